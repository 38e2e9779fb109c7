// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::LoadError;
use crate::listeners::{ListenerSet, PodcastLogoListener};
use crate::loader::{FetchOptions, RemoteLoader};
use crate::model::Podcast;
use crate::policy::{Connectivity, FreshnessPolicy};
use crate::progress::NoopReporter;

use super::{LogoTask, Message, PodcastManager};

/// Everything a logo worker needs, detached from the manager
struct LogoJob {
    url: Url,
    cache_path: PathBuf,
    loader: RemoteLoader,
    connectivity: Arc<dyn Connectivity>,
    freshness: FreshnessPolicy,
    max_bytes: u64,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl PodcastManager {
    /// Load the logo of `podcast` into memory
    ///
    /// Concurrent requests for the same podcast share one worker. Returns
    /// false, without any callback, when the podcast has no logo URL.
    pub fn load_logo(&self, podcast: &Podcast, listener: Arc<dyn PodcastLogoListener>) -> bool {
        let Some(url) = podcast.logo_url.clone() else {
            return false;
        };
        let key = podcast.key();

        {
            let mut state = self.state();
            if let Some(task) = state.logo_loads.get(&key) {
                task.listeners.add(listener);
                return true;
            }
            let listeners = ListenerSet::new();
            listeners.add(listener);
            state.logo_loads.insert(
                key.clone(),
                LogoTask {
                    podcast: podcast.clone(),
                    listeners,
                },
            );
        }

        let job = LogoJob {
            cache_path: logo_cache_path(&self.inner.logo_dir, &url),
            url,
            loader: self.inner.loader.clone(),
            connectivity: Arc::clone(&self.inner.connectivity),
            freshness: self.inner.freshness,
            max_bytes: self.inner.logo_max_bytes,
            slots: Arc::clone(&self.inner.logo_slots),
            cancel: self.inner.shutdown.child_token(),
        };
        let messages = self.inner.messages.clone();

        tokio::spawn(async move {
            let result = job.run().await;
            let _ = messages.send(Message::LogoDone { key, result });
        });
        true
    }

    pub(super) fn finish_logo(&self, key: &str, result: Result<Bytes, LoadError>) {
        let (podcast, listeners) = {
            let mut state = self.state();
            let Some(task) = state.logo_loads.remove(key) else {
                return;
            };
            let mut podcast = task.podcast;
            if let Ok(logo) = &result {
                if let Some(canonical) = state.podcasts.find_mut(podcast.url.as_str()) {
                    canonical.logo = Some(logo.clone());
                }
                podcast.logo = Some(logo.clone());
            }
            (podcast, task.listeners.snapshot())
        };

        match result {
            Ok(_) => {
                for listener in listeners {
                    listener.on_logo_loaded(&podcast);
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                debug!(url = %podcast.url, error = %e, "Logo unavailable");
                for listener in listeners {
                    listener.on_logo_failed(&podcast);
                }
            }
        }
    }
}

impl LogoJob {
    async fn run(self) -> Result<Bytes, LoadError> {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(LoadError::Cancelled),
            permit = Arc::clone(&self.slots).acquire_owned() => {
                permit.map_err(|_| LoadError::Cancelled)?
            }
        };

        let cached_at = cache_modified(&self.cache_path).await;
        let connection = self.connectivity.connection_type();

        if let Some(cached_at) = cached_at
            && (!connection.is_online() || self.freshness.is_logo_fresh(cached_at, Utc::now()))
        {
            return read_cache(&self.cache_path).await;
        }
        if !connection.is_online() {
            return Err(LoadError::Offline {
                url: self.url.to_string(),
            });
        }

        let options = FetchOptions::limited(self.max_bytes);
        match self
            .loader
            .fetch(&self.url, &options, &self.cancel, &NoopReporter)
            .await
        {
            Ok(bytes) => {
                write_cache(&self.cache_path, &bytes).await;
                Ok(bytes)
            }
            Err(e) if !e.is_cancelled() && cached_at.is_some() => {
                warn!(url = %self.url, error = %e, "Logo fetch failed, serving stale copy");
                read_cache(&self.cache_path).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Cache file for the logo at `url`, named by the SHA-256 of the URL
fn logo_cache_path(dir: &Path, url: &Url) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    dir.join(format!("{:x}", hasher.finalize()))
}

async fn cache_modified(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

async fn read_cache(path: &Path) -> Result<Bytes, LoadError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Best effort; a logo that cannot be cached is still delivered
async fn write_cache(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        warn!(path = %parent.display(), error = %e, "Cannot create logo cache");
        return;
    }
    if let Err(e) = tokio::fs::write(path, bytes).await {
        warn!(path = %path.display(), error = %e, "Cannot cache logo");
    }
}
