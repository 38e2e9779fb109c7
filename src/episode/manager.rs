// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{debug, info, warn};

use crate::error::MetadataError;
use crate::listeners::{EpisodeDownloadListener, ListenerSet};
use crate::metadata::{EpisodeMetadata, MetadataStore, write_snapshot};
use crate::model::Episode;

use super::download::{DownloadBackend, DownloadEvent, DownloadId, DownloadRequest};

/// Resolves media URLs to live episodes from loaded feeds
pub trait EpisodeLookup {
    fn find_episode(&self, media_url: &str) -> Option<Episode>;
}

impl<F> EpisodeLookup for F
where
    F: Fn(&str) -> Option<Episode>,
{
    fn find_episode(&self, media_url: &str) -> Option<Episode> {
        self(media_url)
    }
}

/// Per-episode download, playback and playlist state
///
/// Cloning yields another handle to the same manager. Backend events are
/// applied on a coordinating task spawned by [`EpisodeManager::new`].
#[derive(Clone)]
pub struct EpisodeManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    backend: Arc<dyn DownloadBackend>,
    events: UnboundedSender<DownloadEvent>,
    listeners: ListenerSet<dyn EpisodeDownloadListener>,
    metadata_path: PathBuf,
}

struct State {
    store: MetadataStore,
    /// Lazily computed number of completed downloads
    download_count: Option<usize>,
}

impl EpisodeManager {
    /// Open the manager over the metadata file at `metadata_path`
    ///
    /// An unreadable metadata file is logged and replaced by an empty store.
    /// Downloads the backend no longer knows are forgotten so they can be
    /// started again. Must be called inside a tokio runtime.
    pub fn new(metadata_path: PathBuf, backend: Arc<dyn DownloadBackend>) -> Self {
        let mut store = MetadataStore::read_or_empty(&metadata_path);
        forget_orphaned_downloads(&mut store, backend.as_ref());
        let (events, mut events_rx) = unbounded_channel();

        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                store,
                download_count: None,
            }),
            backend,
            events,
            listeners: ListenerSet::new(),
            metadata_path,
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                EpisodeManager { inner }.handle_download_event(event).await;
            }
            debug!("Episode manager coordinator stopped");
        });

        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_listener(&self, listener: Arc<dyn EpisodeDownloadListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn EpisodeDownloadListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    pub fn metadata_path(&self) -> &Path {
        &self.inner.metadata_path
    }

    /// Start downloading `episode` unless it is already downloading or on disk
    pub fn download(&self, episode: &Episode) {
        let key = episode.media_url.as_str();
        {
            let mut state = self.state();
            if let Some(record) = state.store.get(key)
                && (record.is_downloading() || record.is_downloaded())
            {
                debug!(url = key, "Download already present");
                return;
            }

            let record = state.store.entry(key);
            record.describe(episode);
            record.download_id = Some(DownloadId::PENDING);
            record.file_path = None;
        }

        info!(url = key, "Downloading {}", episode.display_name());
        self.inner.backend.enqueue(
            DownloadRequest {
                episode: episode.clone(),
            },
            self.inner.events.clone(),
        );
    }

    /// Apply a backend notification to the metadata and inform listeners
    pub(crate) async fn handle_download_event(&self, event: DownloadEvent) {
        match event {
            DownloadEvent::Enqueued { media_url, id } => {
                let adopted = {
                    let mut state = self.state();
                    match state.store.get_mut(&media_url) {
                        Some(record) if record.download_id == Some(DownloadId::PENDING) => {
                            record.download_id = Some(id);
                            true
                        }
                        _ => false,
                    }
                };
                if !adopted {
                    debug!(%id, url = %media_url, "Enqueued download no longer wanted");
                    if let Err(e) = self.inner.backend.remove(id).await {
                        debug!(%id, error = %e, "Could not remove abandoned download");
                    }
                }
            }
            DownloadEvent::Progress { id, percent } => {
                let Some(media_url) = self.state().store.find_by_download_id(id) else {
                    return;
                };
                for listener in self.inner.listeners.snapshot() {
                    listener.on_download_progress(&media_url, percent);
                }
            }
            DownloadEvent::Succeeded { id, path } => {
                let media_url = {
                    let mut state = self.state();
                    let media_url = state.store.find_by_download_id(id);
                    if let Some(url) = &media_url
                        && let Some(record) = state.store.get_mut(url)
                    {
                        record.file_path = Some(path.clone());
                        if let Some(count) = state.download_count.as_mut() {
                            *count += 1;
                        }
                    }
                    media_url
                };

                let Some(media_url) = media_url else {
                    debug!(%id, path = %path.display(), "Finished download was deleted meanwhile");
                    remove_file_if_present(&path).await;
                    return;
                };
                for listener in self.inner.listeners.snapshot() {
                    listener.on_download_success(&media_url);
                }
            }
            DownloadEvent::Failed { id, reason } => {
                let media_url = {
                    let mut state = self.state();
                    let media_url = state.store.find_by_download_id(id);
                    if let Some(url) = &media_url
                        && let Some(record) = state.store.get_mut(url)
                    {
                        record.download_id = None;
                        record.file_path = None;
                    }
                    media_url
                };

                let Some(media_url) = media_url else { return };
                warn!(%id, url = %media_url, %reason, "Download failed");
                for listener in self.inner.listeners.snapshot() {
                    listener.on_download_failed(&media_url, &reason);
                }
            }
            DownloadEvent::Deleted { media_url } => {
                for listener in self.inner.listeners.snapshot() {
                    listener.on_download_deleted(&media_url);
                }
            }
        }
    }

    /// Forget the download of `episode` and delete its file
    ///
    /// Returns false when the episode was neither downloading nor downloaded.
    pub async fn delete_download(&self, episode: &Episode) -> bool {
        let key = episode.media_url.as_str();
        let (id, path) = {
            let mut state = self.state();
            let State {
                store,
                download_count,
            } = &mut *state;

            let Some(record) = store.get(key) else {
                return false;
            };
            let downloaded = record.is_downloaded();
            if !downloaded && !record.is_downloading() {
                return false;
            }

            let Some(record) = store.get_mut(key) else {
                return false;
            };
            let taken = (record.download_id.take(), record.file_path.take());
            if downloaded && let Some(count) = download_count.as_mut() {
                *count = count.saturating_sub(1);
            }
            taken
        };

        info!(url = key, "Deleting download of {}", episode.display_name());
        let _ = self.inner.events.send(DownloadEvent::Deleted {
            media_url: key.to_string(),
        });

        if let Some(id) = id.filter(|id| !id.is_pending())
            && let Err(e) = self.inner.backend.remove(id).await
        {
            debug!(%id, error = %e, "Backend had nothing to remove");
        }
        if let Some(path) = path {
            remove_file_if_present(&path).await;
        }
        true
    }

    pub fn is_downloaded(&self, episode: &Episode) -> bool {
        self.with_record(episode, EpisodeMetadata::is_downloaded)
    }

    pub fn is_downloading(&self, episode: &Episode) -> bool {
        self.with_record(episode, EpisodeMetadata::is_downloading)
    }

    /// Path of the downloaded file, if the episode is downloaded
    pub fn local_path(&self, episode: &Episode) -> Option<PathBuf> {
        let state = self.state();
        let record = state.store.get(episode.media_url.as_str())?;
        if record.is_downloaded() {
            record.file_path.clone()
        } else {
            None
        }
    }

    /// Number of downloaded episodes, computed once and kept up to date
    pub fn download_count(&self) -> usize {
        let mut state = self.state();
        if let Some(count) = state.download_count {
            return count;
        }
        let count = state
            .store
            .iter()
            .filter(|(_, record)| record.is_downloaded())
            .count();
        state.download_count = Some(count);
        count
    }

    /// Downloaded episodes, newest first
    ///
    /// Episodes whose feed is not loaded are rebuilt from their metadata.
    pub fn downloads(&self, lookup: &dyn EpisodeLookup) -> Vec<Episode> {
        let records = self.matching_records(EpisodeMetadata::is_downloaded);
        let mut episodes = resolve(records, lookup);
        episodes.sort_by(|(a, _), (b, _)| Episode::newest_first(a, b));
        episodes.into_iter().map(|(episode, _)| episode).collect()
    }

    pub fn set_old(&self, episode: &Episode, old: bool) {
        let mut state = self.state();
        let record = state.store.entry(episode.media_url.as_str());
        record.describe(episode);
        record.is_old = Some(old);
    }

    /// Whether the episode was marked old; unknown episodes are new
    pub fn is_old(&self, episode: &Episode) -> bool {
        self.with_record(episode, |record| record.is_old == Some(true))
    }

    /// Store the playback position in milliseconds; `None` clears it
    pub fn set_resume_at(&self, episode: &Episode, position: Option<u64>) {
        let mut state = self.state();
        let record = state.store.entry(episode.media_url.as_str());
        record.describe(episode);
        record.resume_at = position;
    }

    pub fn resume_at(&self, episode: &Episode) -> Option<u64> {
        let state = self.state();
        state.store.get(episode.media_url.as_str())?.resume_at
    }

    /// Put `episode` at the end of the playlist and return its position
    ///
    /// An episode already in the playlist keeps its position.
    pub fn append_to_playlist(&self, episode: &Episode) -> usize {
        let mut state = self.state();
        if let Some(position) = state
            .store
            .get(episode.media_url.as_str())
            .and_then(|record| record.playlist_position)
        {
            return position;
        }

        let position = state
            .store
            .iter()
            .filter(|(_, record)| record.playlist_position.is_some())
            .count();
        let record = state.store.entry(episode.media_url.as_str());
        record.describe(episode);
        record.playlist_position = Some(position);
        position
    }

    /// Take `episode` out of the playlist, closing the gap it leaves
    pub fn remove_from_playlist(&self, episode: &Episode) -> bool {
        let mut state = self.state();
        let Some(removed) = state
            .store
            .get_mut(episode.media_url.as_str())
            .and_then(|record| record.playlist_position.take())
        else {
            return false;
        };

        for (_, record) in state.store.iter_mut() {
            if let Some(position) = record.playlist_position.as_mut()
                && *position > removed
            {
                *position -= 1;
            }
        }
        true
    }

    pub fn playlist_position(&self, episode: &Episode) -> Option<usize> {
        let state = self.state();
        state.store.get(episode.media_url.as_str())?.playlist_position
    }

    /// Playlist episodes in position order
    pub fn playlist(&self, lookup: &dyn EpisodeLookup) -> Vec<Episode> {
        let records = self.matching_records(|record| record.playlist_position.is_some());
        let mut episodes = resolve(records, lookup);
        episodes.sort_by_key(|(_, record)| record.playlist_position);
        episodes.into_iter().map(|(episode, _)| episode).collect()
    }

    /// Write the metadata file if anything changed since the last save
    pub async fn save(&self) -> Result<(), MetadataError> {
        let Some(json) = self.state().store.take_snapshot()? else {
            return Ok(());
        };

        if let Err(e) = write_snapshot(&self.inner.metadata_path, &json).await {
            self.state().store.mark_dirty();
            return Err(e);
        }
        debug!(path = %self.inner.metadata_path.display(), "Saved episode metadata");
        Ok(())
    }

    fn with_record(&self, episode: &Episode, check: impl Fn(&EpisodeMetadata) -> bool) -> bool {
        self.state()
            .store
            .get(episode.media_url.as_str())
            .is_some_and(check)
    }

    fn matching_records(
        &self,
        keep: impl Fn(&EpisodeMetadata) -> bool,
    ) -> Vec<(String, EpisodeMetadata)> {
        self.state()
            .store
            .iter()
            .filter(|(_, record)| keep(record))
            .map(|(url, record)| (url.clone(), record.clone()))
            .collect()
    }
}

/// Clear download ids the backend does not know, e.g. after a restart
///
/// Pending ids never survive a restart. Finished downloads are kept.
fn forget_orphaned_downloads(store: &mut MetadataStore, backend: &dyn DownloadBackend) {
    let orphaned: Vec<String> = store
        .iter()
        .filter(|(_, record)| record.file_path.is_none())
        .filter(|(_, record)| {
            record
                .download_id
                .is_some_and(|id| id.is_pending() || !backend.is_active(id))
        })
        .map(|(url, _)| url.clone())
        .collect();

    for url in &orphaned {
        if let Some(record) = store.get_mut(url) {
            debug!(%url, "Forgetting interrupted download");
            record.download_id = None;
        }
    }
    if !orphaned.is_empty() {
        info!(count = orphaned.len(), "Forgot downloads interrupted by a restart");
    }
}

/// Pair records with live episodes, or stand-ins when the feed is not loaded
fn resolve(
    records: Vec<(String, EpisodeMetadata)>,
    lookup: &dyn EpisodeLookup,
) -> Vec<(Episode, EpisodeMetadata)> {
    records
        .into_iter()
        .filter_map(|(url, record)| {
            let episode = lookup
                .find_episode(&url)
                .or_else(|| record.to_episode(&url))?;
            Some((episode, record))
        })
        .collect()
}

async fn remove_file_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed downloaded file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove downloaded file"),
    }
}
