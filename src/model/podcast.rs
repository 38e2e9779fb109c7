// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use url::Url;

use super::episode::Episode;
use super::suggestion::{Genre, Language, MediaType};

/// Where a podcast is in its load cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    NotLoading,
    Loading,
    Loaded,
    Failed,
}

/// A podcast and, once its feed has been parsed, its episodes
///
/// Podcasts are identified by feed URL, compared without regard to ASCII
/// case.
#[derive(Debug, Clone)]
pub struct Podcast {
    pub name: Option<String>,
    pub url: Url,
    pub description: Option<String>,
    pub language: Option<Language>,
    pub genre: Option<Genre>,
    pub media_type: Option<MediaType>,
    pub logo_url: Option<Url>,
    /// Cached logo image bytes
    pub logo: Option<Bytes>,
    pub last_loaded: Option<DateTime<Utc>>,
    pub explicit: bool,
    /// Encoding declared by the feed document
    pub encoding: Option<String>,
    pub episodes: Vec<Episode>,
    pub failed_attempts: u32,
    pub load_state: LoadState,
}

impl Podcast {
    pub fn new(name: Option<String>, url: Url) -> Self {
        Self {
            name,
            url,
            description: None,
            language: None,
            genre: None,
            media_type: None,
            logo_url: None,
            logo: None,
            last_loaded: None,
            explicit: false,
            encoding: None,
            episodes: Vec::new(),
            failed_attempts: 0,
            load_state: LoadState::NotLoading,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.load_state == LoadState::Loading
    }

    /// Whether the podcast carries a usable (non-blank) name
    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }

    /// Whether this podcast's feed URL equals `url`, ignoring ASCII case
    pub fn has_url(&self, url: &str) -> bool {
        self.url.as_str().eq_ignore_ascii_case(url)
    }

    /// Key used for map lookups, consistent with equality
    pub fn key(&self) -> String {
        url_key(self.url.as_str())
    }

    /// Case-insensitive name order; unnamed podcasts sort first
    pub fn by_name(a: &Podcast, b: &Podcast) -> Ordering {
        let a = a.name.as_deref().map(str::to_lowercase);
        let b = b.name.as_deref().map(str::to_lowercase);
        a.cmp(&b)
    }

    /// Find one of this podcast's episodes by media URL
    pub fn find_episode(&self, media_url: &str) -> Option<&Episode> {
        self.episodes
            .iter()
            .find(|e| e.media_url.as_str() == media_url)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.url.as_str())
    }
}

/// Normalized lookup key for a feed URL
pub(crate) fn url_key(url: &str) -> String {
    url.to_ascii_lowercase()
}

impl PartialEq for Podcast {
    fn eq(&self, other: &Self) -> bool {
        self.has_url(other.url.as_str())
    }
}

impl Eq for Podcast {}

impl Hash for Podcast {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}
