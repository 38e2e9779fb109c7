// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::episode::DownloadId;
use crate::model::Episode;

/// Durable per-episode state, keyed externally by media URL
///
/// Besides the download and playback fields, a record carries enough of
/// its episode and podcast to rebuild a stand-in [`Episode`] when the feed
/// is not loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_id: Option<DownloadId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    /// Playback resume offset in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_old: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_position: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub podcast_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub podcast_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_pub_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_description: Option<String>,
}

impl EpisodeMetadata {
    /// Create a record describing `episode`
    pub fn for_episode(episode: &Episode) -> Self {
        let mut metadata = Self::default();
        metadata.describe(episode);
        metadata
    }

    /// Refresh the denormalized episode and podcast fields
    pub fn describe(&mut self, episode: &Episode) {
        self.podcast_name.clone_from(&episode.podcast_name);
        self.podcast_url = Some(episode.podcast_url().to_string());
        self.episode_name.clone_from(&episode.name);
        self.episode_pub_date = episode.pub_date;
        self.episode_description.clone_from(&episode.description);
    }

    /// Whether any primary field is set; records without data can be dropped
    pub fn has_data(&self) -> bool {
        self.download_id.is_some()
            || self.file_path.is_some()
            || self.resume_at.is_some()
            || self.is_old.is_some()
            || self.playlist_position.is_some()
    }

    /// A download id is set, a path is recorded and the file exists right now
    pub fn is_downloaded(&self) -> bool {
        self.download_id.is_some() && self.file_path.as_ref().is_some_and(|path| path.exists())
    }

    /// A download id is set but no file has arrived yet
    pub fn is_downloading(&self) -> bool {
        self.download_id.is_some() && self.file_path.is_none()
    }

    /// Rebuild an episode from the denormalized fields
    pub fn to_episode(&self, media_url: &str) -> Option<Episode> {
        let media_url = Url::parse(media_url).ok()?;
        let podcast_url = Url::parse(self.podcast_url.as_deref()?).ok()?;

        let mut episode = Episode::new(podcast_url, self.podcast_name.clone(), media_url);
        episode.name.clone_from(&self.episode_name);
        episode.pub_date = self.episode_pub_date;
        episode.description.clone_from(&self.episode_description);
        Some(episode)
    }
}
