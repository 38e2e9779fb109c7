// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use url::Url;

/// A single podcast episode
///
/// Episodes are identified by their media URL. The owning podcast is
/// referenced by its feed URL, which is fixed at construction.
#[derive(Debug, Clone)]
pub struct Episode {
    podcast_url: Url,
    pub podcast_name: Option<String>,
    pub name: Option<String>,
    pub media_url: Url,
    pub pub_date: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub description: Option<String>,
    pub long_description: Option<String>,
}

impl Episode {
    /// Create an episode belonging to the podcast at `podcast_url`
    pub fn new(podcast_url: Url, podcast_name: Option<String>, media_url: Url) -> Self {
        Self {
            podcast_url,
            podcast_name,
            name: None,
            media_url,
            pub_date: None,
            duration: None,
            description: None,
            long_description: None,
        }
    }

    /// Feed URL of the owning podcast
    pub fn podcast_url(&self) -> &Url {
        &self.podcast_url
    }

    /// Reverse chronological order; a missing date on either side compares equal
    pub fn newest_first(a: &Episode, b: &Episode) -> Ordering {
        match (a.pub_date, b.pub_date) {
            (Some(a), Some(b)) => b.cmp(&a),
            _ => Ordering::Equal,
        }
    }

    /// Display name, falling back to the media URL
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.media_url.as_str())
    }
}

impl PartialEq for Episode {
    fn eq(&self, other: &Self) -> bool {
        self.media_url.as_str() == other.media_url.as_str()
    }
}

impl Eq for Episode {}

impl Hash for Episode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.media_url.as_str().hash(state);
    }
}
