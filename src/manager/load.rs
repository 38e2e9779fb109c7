// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::feed::load_feed;
use crate::listeners::{FailureReason, ListenerSet, PodcastLoadListener};
use crate::loader::{CacheMode, FetchOptions};
use crate::model::{LoadState, Podcast, url_key};
use crate::progress::LoadProgress;

use super::{LoadTask, Message, PodcastManager};

/// How a call to [`PodcastManager::load`] was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadRequest {
    /// The cached episode list is fresh; no network traffic
    Cached,
    /// A new feed load was started
    Started,
    /// The listener joined a load already in flight
    Joined,
}

impl PodcastManager {
    /// Make sure the episode list of `podcast` is fresh
    ///
    /// A fresh podcast is delivered as loaded without touching the network.
    /// A stale podcast that is already loading gains `listener` as another
    /// waiter. Otherwise a feed load starts. Either way `listener` receives
    /// exactly one terminal callback on the coordinator task.
    pub fn load(&self, podcast: &Podcast, listener: Arc<dyn PodcastLoadListener>) -> LoadRequest {
        self.start_load(podcast, listener, false)
    }

    /// Cancel the in-flight load of `url`
    ///
    /// Its listeners receive `on_podcast_load_cancelled`. Returns false when
    /// nothing was loading.
    pub fn cancel_load(&self, url: &str) -> bool {
        let task = {
            let mut state = self.state();
            let Some(task) = state.loads.remove(&url_key(url)) else {
                return false;
            };
            if let Some(podcast) = state.podcasts.find_mut(url) {
                podcast.load_state = LoadState::NotLoading;
            }
            task
        };

        task.token.cancel();
        debug!(%url, "Feed load cancelled");
        self.send(Message::Cancelled {
            listeners: task.listeners.snapshot(),
            podcast: Box::new(task.podcast),
        });
        true
    }

    /// Number of feed loads currently running
    pub fn in_flight(&self) -> usize {
        self.state().loads.len()
    }

    /// Start or join a load; `force` skips the freshness check
    pub(super) fn start_load(
        &self,
        podcast: &Podcast,
        listener: Arc<dyn PodcastLoadListener>,
        force: bool,
    ) -> LoadRequest {
        let connection = self.inner.connectivity.connection_type();
        let key = podcast.key();

        let mut state = self.state();
        if let Some(task) = state.loads.get(&key) {
            task.listeners.add(listener);
            return LoadRequest::Joined;
        }

        let current = state
            .podcasts
            .find(podcast.url.as_str())
            .cloned()
            .unwrap_or_else(|| podcast.clone());

        if !force && !self.inner.freshness.is_stale(&current, connection, Utc::now()) {
            drop(state);
            debug!(url = %current.url, "Episode list is fresh");
            self.send(Message::Cached {
                podcast: Box::new(current),
                listener,
            });
            return LoadRequest::Cached;
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let token = self.inner.shutdown.child_token();
        if let Some(canonical) = state.podcasts.find_mut(podcast.url.as_str()) {
            canonical.load_state = LoadState::Loading;
        }

        let mut worker_podcast = current;
        worker_podcast.load_state = LoadState::Loading;
        let listeners = ListenerSet::new();
        listeners.add(listener);
        state.loads.insert(
            key.clone(),
            LoadTask {
                generation,
                token: token.clone(),
                podcast: worker_podcast.clone(),
                listeners,
            },
        );
        drop(state);

        let cache = if connection.is_online() {
            CacheMode::MaxStale(self.inner.freshness.max_stale(connection))
        } else {
            CacheMode::OnlyIfCached
        };
        let options = FetchOptions::limited(self.inner.feed_max_bytes).with_cache(cache);
        let loader = self.inner.loader.clone();
        let messages = self.inner.messages.clone();

        info!(url = %worker_podcast.url, "Loading {}", worker_podcast.display_name());
        tokio::spawn(async move {
            let progress_messages = messages.clone();
            let progress_key = key.clone();
            let reporter = move |progress: LoadProgress| {
                let _ = progress_messages.send(Message::Progress {
                    key: progress_key.clone(),
                    generation,
                    progress,
                });
            };

            let mut podcast = worker_podcast;
            let result = load_feed(&loader, &mut podcast, &options, &token, &reporter).await;
            let _ = messages.send(Message::FeedDone {
                key,
                generation,
                podcast: Box::new(podcast),
                result,
            });
        });

        LoadRequest::Started
    }

    pub(super) fn report_progress(&self, key: &str, generation: u64, progress: LoadProgress) {
        let (podcast, listeners) = {
            let state = self.state();
            match state.loads.get(key) {
                Some(task) if task.generation == generation => {
                    (task.podcast.clone(), task.listeners.snapshot())
                }
                _ => return,
            }
        };

        for listener in listeners {
            listener.on_podcast_loading(&podcast, progress);
        }
    }

    /// Apply a finished feed load to the list and notify its listeners
    pub(super) fn finish_load(
        &self,
        key: &str,
        generation: u64,
        loaded: Podcast,
        result: Result<(), LoadError>,
    ) {
        let mut state = self.state();
        match state.loads.get(key) {
            Some(task) if task.generation == generation => {}
            _ => {
                debug!(url = %loaded.url, "Dropping result of a cancelled load");
                return;
            }
        }
        let Some(task) = state.loads.remove(key) else {
            return;
        };
        let listeners = task.listeners.snapshot();

        match result {
            Ok(()) => {
                let delivered = match state.podcasts.find_mut(loaded.url.as_str()) {
                    Some(canonical) => {
                        let renamed = !canonical.has_name() && loaded.has_name();
                        apply_loaded(canonical, loaded);
                        let delivered = canonical.clone();
                        if renamed {
                            state.list_dirty = true;
                        }
                        delivered
                    }
                    None => {
                        let mut podcast = loaded;
                        podcast.failed_attempts = 0;
                        podcast.load_state = LoadState::Loaded;
                        podcast
                    }
                };
                drop(state);

                info!(
                    url = %delivered.url,
                    episodes = delivered.episodes.len(),
                    "Loaded {}",
                    delivered.display_name()
                );
                self.deliver_loaded(&delivered, &listeners);
            }
            Err(e) if e.is_cancelled() => {
                if let Some(canonical) = state.podcasts.find_mut(loaded.url.as_str()) {
                    canonical.load_state = LoadState::NotLoading;
                }
                drop(state);
                super::notify_cancelled(&task.podcast, &listeners);
            }
            Err(e) => {
                let delivered = match state.podcasts.find_mut(loaded.url.as_str()) {
                    Some(canonical) => {
                        mark_failed(canonical);
                        canonical.clone()
                    }
                    None => {
                        let mut podcast = loaded;
                        podcast.failed_attempts = task.podcast.failed_attempts;
                        mark_failed(&mut podcast);
                        podcast
                    }
                };
                drop(state);

                warn!(
                    url = %delivered.url,
                    attempts = delivered.failed_attempts,
                    error = %e,
                    "Failed to load {}",
                    delivered.display_name()
                );
                for listener in listeners {
                    listener.on_podcast_load_failed(&delivered, FailureReason::LoadFailed);
                }
            }
        }
    }

    /// Report a loaded podcast, unless explicit content is blocked
    pub(super) fn deliver_loaded(&self, podcast: &Podcast, listeners: &[Arc<dyn PodcastLoadListener>]) {
        if podcast.explicit && self.blocks_explicit() {
            debug!(url = %podcast.url, "Blocking explicit podcast");
            for listener in listeners {
                listener.on_podcast_load_failed(podcast, FailureReason::ExplicitContentBlocked);
            }
            return;
        }

        for listener in listeners {
            listener.on_podcast_loaded(podcast);
        }
    }
}

/// Merge a freshly parsed copy into the canonical podcast
///
/// A name already set on the canonical entry is kept.
fn apply_loaded(canonical: &mut Podcast, loaded: Podcast) {
    if !canonical.has_name() {
        canonical.name = loaded.name;
    }
    if loaded.description.is_some() {
        canonical.description = loaded.description;
    }
    if canonical.logo_url.is_none() {
        canonical.logo_url = loaded.logo_url;
    }
    canonical.explicit = loaded.explicit;
    canonical.encoding = loaded.encoding;
    canonical.episodes = loaded.episodes;
    canonical.last_loaded = loaded.last_loaded;
    canonical.failed_attempts = 0;
    canonical.load_state = LoadState::Loaded;
}

fn mark_failed(podcast: &mut Podcast) {
    podcast.episodes.clear();
    podcast.last_loaded = None;
    podcast.failed_attempts += 1;
    podcast.load_state = LoadState::Failed;
}

#[cfg(test)]
mod tests {
    use super::super::tests::{ChannelListener, FEED, FEED_URL, gated, manager_with, show};
    use super::*;
    use crate::loader::tests::MockHttpClient;
    use crate::policy::{ConnectionType, SharedConnectivity};
    use tempfile::tempdir;

    #[tokio::test]
    async fn concurrent_loads_share_one_fetch() {
        let dir = tempdir().unwrap();
        let (client, gate) = gated(MockHttpClient::with(FEED_URL, 200, FEED.as_bytes()));
        let manager = manager_with(client.clone(), dir.path(), SharedConnectivity::default());
        manager.add_podcast(show("My name", FEED_URL)).unwrap();
        let podcast = manager.find_podcast(FEED_URL).unwrap();

        let (first, mut first_rx) = ChannelListener::new();
        let (second, mut second_rx) = ChannelListener::new();
        assert_eq!(manager.load(&podcast, first.clone()), LoadRequest::Started);
        assert_eq!(manager.load(&podcast, second), LoadRequest::Joined);
        assert_eq!(manager.load(&podcast, first), LoadRequest::Joined);
        assert!(manager.find_podcast(FEED_URL).unwrap().is_loading());

        gate.notify_one();

        assert_eq!(first_rx.recv().await.unwrap(), "loaded My name 1");
        assert_eq!(second_rx.recv().await.unwrap(), "loaded My name 1");
        assert_eq!(client.calls(), 1);
        assert_eq!(manager.in_flight(), 0);

        let canonical = manager.find_podcast(FEED_URL).unwrap();
        assert_eq!(canonical.load_state, LoadState::Loaded);
        assert_eq!(canonical.name.as_deref(), Some("My name"));
        assert!(manager.find_episode("https://example.com/1.mp3").is_some());
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].cache_control.as_deref(), Some("max-stale=1800"));
    }

    #[tokio::test]
    async fn fresh_podcast_is_served_from_cache() {
        let dir = tempdir().unwrap();
        let client = Arc::new(MockHttpClient::with(FEED_URL, 200, FEED.as_bytes()));
        let manager = manager_with(client.clone(), dir.path(), SharedConnectivity::default());
        manager.add_podcast(show("Show", FEED_URL)).unwrap();
        let podcast = manager.find_podcast(FEED_URL).unwrap();

        let (listener, mut rx) = ChannelListener::new();
        assert_eq!(manager.load(&podcast, listener.clone()), LoadRequest::Started);
        assert_eq!(rx.recv().await.unwrap(), "loaded Show 1");

        assert_eq!(manager.load(&podcast, listener), LoadRequest::Cached);
        assert_eq!(rx.recv().await.unwrap(), "loaded Show 1");
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn failed_load_resets_the_podcast() {
        let dir = tempdir().unwrap();
        let client = Arc::new(MockHttpClient::with(FEED_URL, 500, b"oops"));
        let manager = manager_with(client, dir.path(), SharedConnectivity::default());
        manager.add_podcast(show("Show", FEED_URL)).unwrap();
        let podcast = manager.find_podcast(FEED_URL).unwrap();

        let (listener, mut rx) = ChannelListener::new();
        manager.load(&podcast, listener.clone());
        assert_eq!(rx.recv().await.unwrap(), "failed Show LoadFailed");

        manager.load(&podcast, listener);
        assert_eq!(rx.recv().await.unwrap(), "failed Show LoadFailed");

        let canonical = manager.find_podcast(FEED_URL).unwrap();
        assert_eq!(canonical.load_state, LoadState::Failed);
        assert_eq!(canonical.failed_attempts, 2);
        assert!(canonical.last_loaded.is_none());
        assert!(canonical.episodes.is_empty());
    }

    #[tokio::test]
    async fn parse_errors_are_load_failures() {
        let dir = tempdir().unwrap();
        let client = Arc::new(MockHttpClient::with(FEED_URL, 200, b"<rss><channel><item>"));
        let manager = manager_with(client, dir.path(), SharedConnectivity::default());
        let (listener, mut rx) = ChannelListener::new();

        let preview = show("Preview", FEED_URL);
        assert_eq!(manager.load(&preview, listener), LoadRequest::Started);

        assert_eq!(rx.recv().await.unwrap(), "failed Preview LoadFailed");
        assert!(manager.podcasts().is_empty());
    }

    #[tokio::test]
    async fn explicit_podcasts_can_be_blocked() {
        let dir = tempdir().unwrap();
        let feed = FEED.replace("<title>Show</title>", "<title>Show</title><itunes:explicit>yes</itunes:explicit>");
        let client = Arc::new(MockHttpClient::with(FEED_URL, 200, feed.as_bytes()));
        let manager = manager_with(client.clone(), dir.path(), SharedConnectivity::default());
        manager.add_podcast(show("Show", FEED_URL)).unwrap();
        manager.set_block_explicit(true);
        let podcast = manager.find_podcast(FEED_URL).unwrap();

        let (listener, mut rx) = ChannelListener::new();
        manager.load(&podcast, listener.clone());
        assert_eq!(rx.recv().await.unwrap(), "failed Show ExplicitContentBlocked");

        manager.load(&podcast, listener.clone());
        assert_eq!(rx.recv().await.unwrap(), "failed Show ExplicitContentBlocked");
        assert_eq!(client.calls(), 1);

        manager.set_block_explicit(false);
        manager.load(&podcast, listener);
        assert_eq!(rx.recv().await.unwrap(), "loaded Show 1");
    }

    #[tokio::test]
    async fn reload_picks_up_a_changed_description() {
        let dir = tempdir().unwrap();
        let feed = FEED.replace(
            "<title>Show</title>",
            "<title>Show</title><description>New blurb</description>",
        );
        let client = Arc::new(MockHttpClient::with(FEED_URL, 200, feed.as_bytes()));
        let manager = manager_with(client, dir.path(), SharedConnectivity::default());
        let mut subscribed = show("Show", FEED_URL);
        subscribed.description = Some("Old blurb".to_string());
        manager.add_podcast(subscribed).unwrap();
        let podcast = manager.find_podcast(FEED_URL).unwrap();

        let (listener, mut rx) = ChannelListener::new();
        manager.load(&podcast, listener);
        assert_eq!(rx.recv().await.unwrap(), "loaded Show 1");

        let canonical = manager.find_podcast(FEED_URL).unwrap();
        assert_eq!(canonical.description.as_deref(), Some("New blurb"));
    }

    #[tokio::test]
    async fn cancel_load_notifies_and_allows_a_new_load() {
        let dir = tempdir().unwrap();
        let (client, gate) = gated(MockHttpClient::with(FEED_URL, 200, FEED.as_bytes()));
        let manager = manager_with(client.clone(), dir.path(), SharedConnectivity::default());
        manager.add_podcast(show("Show", FEED_URL)).unwrap();
        let podcast = manager.find_podcast(FEED_URL).unwrap();

        let (listener, mut rx) = ChannelListener::new();
        assert_eq!(manager.load(&podcast, listener.clone()), LoadRequest::Started);
        assert!(manager.cancel_load(FEED_URL));
        assert!(!manager.cancel_load(FEED_URL));
        assert_eq!(rx.recv().await.unwrap(), "cancelled Show");
        assert_eq!(
            manager.find_podcast(FEED_URL).unwrap().load_state,
            LoadState::NotLoading
        );

        assert_eq!(manager.load(&podcast, listener), LoadRequest::Started);
        gate.notify_one();
        assert_eq!(rx.recv().await.unwrap(), "loaded Show 1");
    }

    #[tokio::test]
    async fn offline_loads_ask_for_cached_copies_only() {
        let dir = tempdir().unwrap();
        let client = Arc::new(MockHttpClient::default());
        let manager = manager_with(
            client.clone(),
            dir.path(),
            SharedConnectivity::new(ConnectionType::Offline),
        );
        let (listener, mut rx) = ChannelListener::new();

        manager.load(&show("Show", FEED_URL), listener);

        assert_eq!(rx.recv().await.unwrap(), "failed Show LoadFailed");
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].cache_control.as_deref(), Some("only-if-cached"));
    }
}
