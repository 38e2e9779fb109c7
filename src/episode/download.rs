// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::DownloadError;
use crate::loader::{FetchOptions, RemoteLoader};
use crate::model::Episode;
use crate::progress::LoadProgress;

use super::filename::download_path;

/// Identifier a download backend assigns to a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub u64);

impl DownloadId {
    /// Placeholder held until the backend reports the real id
    pub const PENDING: DownloadId = DownloadId(u64::MAX);

    pub fn is_pending(self) -> bool {
        self == Self::PENDING
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_pending() {
            f.write_str("pending")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// A transfer handed to a download backend
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub episode: Episode,
}

/// Notifications a download backend sends back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// The transfer for `media_url` was accepted under `id`
    Enqueued { media_url: String, id: DownloadId },
    Progress { id: DownloadId, percent: u8 },
    Succeeded { id: DownloadId, path: PathBuf },
    Failed { id: DownloadId, reason: String },
    /// The download of `media_url` was deleted; only the episode manager
    /// sends this, so listeners hear about it on its coordinating task
    Deleted { media_url: String },
}

/// The subsystem that moves episode media onto disk
///
/// `enqueue` must return promptly; the backend reports `Enqueued` and then
/// progress and exactly one terminal event through `events`. A removed
/// transfer sends no terminal event.
#[async_trait]
pub trait DownloadBackend: Send + Sync {
    fn enqueue(&self, request: DownloadRequest, events: UnboundedSender<DownloadEvent>);

    /// Whether the transfer `id` is still known to the backend
    ///
    /// Transfers recorded before a restart that the backend no longer knows
    /// are dropped from the metadata.
    fn is_active(&self, id: DownloadId) -> bool;

    /// Stop and forget a transfer
    async fn remove(&self, id: DownloadId) -> Result<(), DownloadError>;
}

/// Download backend streaming media through the remote loader
pub struct HttpDownloadBackend {
    loader: RemoteLoader,
    root: PathBuf,
    next_id: AtomicU64,
    transfers: Arc<Mutex<HashMap<DownloadId, CancellationToken>>>,
}

impl HttpDownloadBackend {
    /// Files land below `root`, one directory per podcast
    pub fn new(loader: RemoteLoader, root: PathBuf) -> Self {
        Self {
            loader,
            root,
            next_id: AtomicU64::new(1),
            transfers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of transfers still running
    pub fn active(&self) -> usize {
        self.transfers.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DownloadBackend for HttpDownloadBackend {
    fn enqueue(&self, request: DownloadRequest, events: UnboundedSender<DownloadEvent>) {
        let id = DownloadId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        if let Ok(mut transfers) = self.transfers.lock() {
            transfers.insert(id, token.clone());
        }

        let episode = request.episode;
        let media_url: Url = episode.media_url.clone();
        let path = download_path(&self.root, &episode);
        let loader = self.loader.clone();
        let transfers = Arc::clone(&self.transfers);

        let _ = events.send(DownloadEvent::Enqueued {
            media_url: media_url.to_string(),
            id,
        });
        debug!(%id, url = %media_url, path = %path.display(), "Download enqueued");

        tokio::spawn(async move {
            let progress_events = events.clone();
            let reporter = move |progress: LoadProgress| {
                if let LoadProgress::Loading {
                    percent: Some(percent),
                } = progress
                {
                    let _ = progress_events.send(DownloadEvent::Progress { id, percent });
                }
            };

            let result = loader
                .fetch_to_file(&media_url, &path, &FetchOptions::default(), &token, &reporter)
                .await;

            if let Ok(mut transfers) = transfers.lock() {
                transfers.remove(&id);
            }

            let event = match result {
                Ok(bytes) => {
                    info!(%id, bytes, path = %path.display(), "Download finished");
                    DownloadEvent::Succeeded { id, path }
                }
                Err(e) if e.is_cancelled() => {
                    debug!(%id, "Download removed");
                    return;
                }
                Err(e) => {
                    warn!(%id, error = %e, "Download failed");
                    DownloadEvent::Failed {
                        id,
                        reason: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    fn is_active(&self, id: DownloadId) -> bool {
        self.transfers
            .lock()
            .map(|transfers| transfers.contains_key(&id))
            .unwrap_or(false)
    }

    async fn remove(&self, id: DownloadId) -> Result<(), DownloadError> {
        let token = self
            .transfers
            .lock()
            .ok()
            .and_then(|mut transfers| transfers.remove(&id))
            .ok_or(DownloadError::UnknownId(id.0))?;
        token.cancel();
        Ok(())
    }
}
