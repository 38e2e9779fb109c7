// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::SuggestionError;
use crate::loader::{FetchOptions, RemoteLoader};
use crate::manager::PodcastManager;
use crate::model::{Genre, Language, MediaType, Podcast, Suggestion, url_key};
use crate::progress::NoopReporter;

/// Top level of the suggestions document
///
/// Entries stay untyped here so one bad entry cannot sink the document.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SuggestionDocument {
    featured: Vec<Value>,
    suggestions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SuggestionEntry {
    title: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
    language: Language,
    genre: Genre,
    #[serde(rename = "type")]
    media_type: MediaType,
    #[serde(default)]
    explicit: bool,
}

impl SuggestionEntry {
    fn into_suggestion(self, featured: bool) -> Option<Suggestion> {
        let url = match Url::parse(&self.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Skipping suggestion with malformed URL");
                return None;
            }
        };
        let name = Some(self.title.trim().to_string()).filter(|t| !t.is_empty());

        let mut podcast = Podcast::new(name, url);
        podcast.description = self.description.filter(|d| !d.trim().is_empty());
        podcast.language = Some(self.language);
        podcast.genre = Some(self.genre);
        podcast.media_type = Some(self.media_type);
        podcast.explicit = self.explicit;
        Some(Suggestion::new(podcast, featured))
    }
}

/// Parse the suggestions document
///
/// Featured entries come first. Entries with unknown enum values or bad
/// URLs are skipped one by one, as are general entries repeating a
/// featured podcast.
pub fn parse_suggestions(json_bytes: &[u8]) -> Result<Vec<Suggestion>, SuggestionError> {
    let document: SuggestionDocument = serde_json::from_slice(json_bytes)?;

    let mut suggestions = Vec::new();
    let mut seen = HashSet::new();
    let sections = [(document.featured, true), (document.suggestions, false)];

    for (entries, featured) in sections {
        for entry in entries {
            let parsed = match serde_json::from_value::<SuggestionEntry>(entry) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "Skipping invalid suggestion");
                    continue;
                }
            };
            let Some(suggestion) = parsed.into_suggestion(featured) else {
                continue;
            };
            if !seen.insert(suggestion.podcast.key()) {
                debug!(url = %suggestion.podcast.url, "Skipping repeated suggestion");
                continue;
            }
            suggestions.push(suggestion);
        }
    }

    Ok(suggestions)
}

/// Load and parse the suggestions document at `url`
pub async fn fetch_suggestions(
    loader: &RemoteLoader,
    url: &Url,
    max_bytes: u64,
    cancel: &CancellationToken,
) -> Result<Vec<Suggestion>, SuggestionError> {
    let bytes = loader
        .fetch(url, &FetchOptions::limited(max_bytes), cancel, &NoopReporter)
        .await?;
    let suggestions = parse_suggestions(&bytes)?;
    debug!(%url, suggestions = suggestions.len(), "Loaded suggestions");
    Ok(suggestions)
}

/// Drop suggestions for podcasts already in the manager's list
pub fn without_subscribed(suggestions: Vec<Suggestion>, manager: &PodcastManager) -> Vec<Suggestion> {
    let subscribed: HashSet<String> = manager.podcasts().iter().map(Podcast::key).collect();
    suggestions
        .into_iter()
        .filter(|s| !subscribed.contains(&url_key(s.podcast.url.as_str())))
        .collect()
}
