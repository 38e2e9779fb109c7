// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::MetadataError;

use super::record::EpisodeMetadata;

/// Name of the episode metadata file inside the data directory
pub const METADATA_FILENAME: &str = "episodes.json";

/// In-memory map from media URL to episode metadata with a dirty flag
///
/// Every mutation goes through [`MetadataStore::entry`] or
/// [`MetadataStore::get_mut`], which mark the store dirty.
#[derive(Debug, Default)]
pub struct MetadataStore {
    records: HashMap<String, EpisodeMetadata>,
    dirty: bool,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the store from `path`
    ///
    /// A missing file yields an empty store.
    pub fn read(path: &Path) -> Result<Self, MetadataError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path).map_err(|e| MetadataError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let records: HashMap<String, EpisodeMetadata> =
            serde_json::from_str(&content).map_err(|e| MetadataError::JsonParseFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        debug!(path = %path.display(), records = records.len(), "Read episode metadata");
        Ok(Self {
            records,
            dirty: false,
        })
    }

    /// Read the store, logging failures and falling back to an empty store
    pub fn read_or_empty(path: &Path) -> Self {
        Self::read(path).unwrap_or_else(|e| {
            warn!(error = %e, "Episode metadata unavailable, starting empty");
            Self::new()
        })
    }

    pub fn get(&self, media_url: &str) -> Option<&EpisodeMetadata> {
        self.records.get(media_url)
    }

    /// Mutable access to an existing record; marks the store dirty
    pub fn get_mut(&mut self, media_url: &str) -> Option<&mut EpisodeMetadata> {
        let record = self.records.get_mut(media_url)?;
        self.dirty = true;
        Some(record)
    }

    /// Record for `media_url`, created empty if missing; marks the store dirty
    pub fn entry(&mut self, media_url: &str) -> &mut EpisodeMetadata {
        self.dirty = true;
        self.records.entry(media_url.to_string()).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EpisodeMetadata)> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut EpisodeMetadata)> {
        self.dirty = true;
        self.records.iter_mut()
    }

    /// Media URL of the record holding `download_id`
    pub fn find_by_download_id(&self, download_id: crate::episode::DownloadId) -> Option<String> {
        self.records
            .iter()
            .find(|(_, record)| record.download_id == Some(download_id))
            .map(|(url, _)| url.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Drop records that carry no data; returns how many were removed
    pub fn prune(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.has_data());
        before - self.records.len()
    }

    /// Prune and serialize the store if it is dirty, clearing the flag
    ///
    /// Returns `None` when there is nothing to write. A caller whose write
    /// fails must call [`MetadataStore::mark_dirty`].
    pub fn take_snapshot(&mut self) -> Result<Option<Vec<u8>>, MetadataError> {
        if !self.dirty {
            return Ok(None);
        }
        let pruned = self.prune();
        if pruned > 0 {
            debug!(pruned, "Pruned empty episode metadata records");
        }

        let json = serde_json::to_vec_pretty(&self.records)?;
        self.dirty = false;
        Ok(Some(json))
    }
}

/// Write a serialized store to `path` through a temporary sibling file
pub async fn write_snapshot(path: &Path, json: &[u8]) -> Result<(), MetadataError> {
    let tmp_path = path.with_extension("json.tmp");
    let write_failed = |e| MetadataError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }
    tokio::fs::write(&tmp_path, json).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)
}
