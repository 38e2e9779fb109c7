// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Podcast list ownership and coordination of feed and logo loads
//!
//! A [`PodcastManager`] owns the canonical podcast list. Feed and logo
//! loads run as tokio tasks and report back over a channel to a single
//! coordinator task, which applies their results and calls listeners.

mod load;
mod logo;
mod sweep;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::episode::EpisodeLookup;
use crate::error::{InsertError, LoadError, OpmlError};
use crate::listeners::{ListenerSet, PodcastListListener, PodcastLoadListener, PodcastLogoListener};
use crate::loader::RemoteLoader;
use crate::model::{Episode, LoadState, Podcast, PodcastList};
use crate::opml::PodcastListStore;
use crate::policy::{Connectivity, FreshnessPolicy, SweepPolicy};
use crate::progress::LoadProgress;
use crate::settings::Settings;

pub use load::LoadRequest;

/// Owner of the podcast list and coordinator of all podcast loads
///
/// Cloning yields another handle to the same manager. All listener
/// callbacks run on the coordinator task spawned by [`PodcastManager::new`].
#[derive(Clone)]
pub struct PodcastManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    loader: RemoteLoader,
    store: Arc<dyn PodcastListStore>,
    connectivity: Arc<dyn Connectivity>,
    freshness: FreshnessPolicy,
    sweep: SweepPolicy,
    feed_max_bytes: u64,
    logo_max_bytes: u64,
    logo_dir: PathBuf,
    logo_slots: Arc<Semaphore>,
    block_explicit: AtomicBool,
    list_listeners: ListenerSet<dyn PodcastListListener>,
    messages: UnboundedSender<Message>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct State {
    podcasts: PodcastList,
    list_loaded: bool,
    list_dirty: bool,
    loads: HashMap<String, LoadTask>,
    logo_loads: HashMap<String, LogoTask>,
    next_generation: u64,
}

/// An in-flight feed load and everybody waiting for it
struct LoadTask {
    generation: u64,
    token: CancellationToken,
    podcast: Podcast,
    listeners: ListenerSet<dyn PodcastLoadListener>,
}

struct LogoTask {
    podcast: Podcast,
    listeners: ListenerSet<dyn PodcastLogoListener>,
}

/// Work reported to the coordinator task
enum Message {
    Progress {
        key: String,
        generation: u64,
        progress: LoadProgress,
    },
    FeedDone {
        key: String,
        generation: u64,
        podcast: Box<Podcast>,
        result: Result<(), LoadError>,
    },
    Cached {
        podcast: Box<Podcast>,
        listener: Arc<dyn PodcastLoadListener>,
    },
    Cancelled {
        podcast: Box<Podcast>,
        listeners: Vec<Arc<dyn PodcastLoadListener>>,
    },
    ListChanged {
        podcast: Box<Podcast>,
        added: bool,
    },
    LogoDone {
        key: String,
        result: Result<Bytes, LoadError>,
    },
}

impl PodcastManager {
    /// Create a manager and spawn its coordinator task
    ///
    /// The podcast list starts empty; call
    /// [`PodcastManager::load_podcast_list`] to read it from `store`. Must be
    /// called inside a tokio runtime.
    pub fn new(
        loader: RemoteLoader,
        store: Arc<dyn PodcastListStore>,
        connectivity: Arc<dyn Connectivity>,
        settings: &Settings,
        logo_dir: PathBuf,
    ) -> Self {
        let (messages, messages_rx) = unbounded_channel();

        let inner = Arc::new(Inner {
            state: Mutex::new(State::default()),
            loader,
            store,
            connectivity,
            freshness: FreshnessPolicy::from_settings(&settings.freshness),
            sweep: SweepPolicy::from_settings(&settings.freshness),
            feed_max_bytes: settings.network.feed_max_bytes,
            logo_max_bytes: settings.network.logo_max_bytes,
            logo_dir,
            logo_slots: Arc::new(Semaphore::new(settings.freshness.max_logo_loads.max(1))),
            block_explicit: AtomicBool::new(settings.block_explicit),
            list_listeners: ListenerSet::new(),
            messages,
            shutdown: CancellationToken::new(),
        });

        spawn_coordinator(Arc::downgrade(&inner), messages_rx);
        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, message: Message) {
        if self.inner.messages.send(message).is_err() {
            debug!("Coordinator gone, dropping message");
        }
    }

    pub fn add_list_listener(&self, listener: Arc<dyn PodcastListListener>) -> bool {
        self.inner.list_listeners.add(listener)
    }

    pub fn remove_list_listener(&self, listener: &Arc<dyn PodcastListListener>) -> bool {
        self.inner.list_listeners.remove(listener)
    }

    /// Report explicit podcasts as blocked instead of loaded
    pub fn set_block_explicit(&self, block: bool) {
        self.inner.block_explicit.store(block, Ordering::Relaxed);
    }

    pub fn blocks_explicit(&self) -> bool {
        self.inner.block_explicit.load(Ordering::Relaxed)
    }

    /// Copy of the podcast list; empty until the list is loaded
    pub fn podcasts(&self) -> Vec<Podcast> {
        self.state().podcasts.to_vec()
    }

    pub fn find_podcast(&self, url: &str) -> Option<Podcast> {
        self.state().podcasts.find(url).cloned()
    }

    /// Find an episode of any listed podcast by media URL
    pub fn find_episode(&self, media_url: &str) -> Option<Episode> {
        let state = self.state();
        state
            .podcasts
            .iter()
            .find_map(|podcast| podcast.find_episode(media_url))
            .cloned()
    }

    pub fn is_list_loaded(&self) -> bool {
        self.state().list_loaded
    }

    /// Add a podcast to the list
    ///
    /// Unnamed podcasts and duplicates are rejected without notifying
    /// anybody.
    pub fn add_podcast(&self, podcast: Podcast) -> Result<(), InsertError> {
        let added = podcast.clone();
        {
            let mut state = self.state();
            state.podcasts.insert(podcast)?;
            state.podcasts.sort_by_name();
            state.list_dirty = true;
        }

        info!(url = %added.url, "Added podcast {}", added.display_name());
        self.send(Message::ListChanged {
            podcast: Box::new(added),
            added: true,
        });
        Ok(())
    }

    /// Remove a podcast from the list, cancelling its load if one is running
    pub fn remove_podcast(&self, url: &str) -> Option<Podcast> {
        let removed = {
            let mut state = self.state();
            let removed = state.podcasts.remove(url)?;
            state.list_dirty = true;
            removed
        };

        self.cancel_load(url);
        info!(url = %removed.url, "Removed podcast {}", removed.display_name());
        self.send(Message::ListChanged {
            podcast: Box::new(removed.clone()),
            added: false,
        });
        Some(removed)
    }

    /// Replace the list with the stored one
    ///
    /// A store that cannot be read is logged and yields an empty list.
    pub async fn load_podcast_list(&self) {
        let podcasts = match self.inner.store.load().await {
            Ok(podcasts) => podcasts,
            Err(e) => {
                warn!(error = %e, "Podcast list unavailable, starting empty");
                Vec::new()
            }
        };

        let mut list = PodcastList::new();
        for podcast in podcasts {
            let url = podcast.url.clone();
            if let Err(e) = list.insert(podcast) {
                warn!(%url, error = %e, "Skipping stored podcast");
            }
        }
        list.sort_by_name();

        let mut state = self.state();
        debug!(podcasts = list.len(), "Podcast list loaded");
        state.podcasts = list;
        state.list_loaded = true;
        state.list_dirty = false;
    }

    /// Write the list to the store if it changed since the last save
    pub async fn save_podcast_list(&self) -> Result<(), OpmlError> {
        let podcasts = {
            let mut state = self.state();
            if !state.list_dirty {
                return Ok(());
            }
            state.list_dirty = false;
            state.podcasts.to_vec()
        };

        if let Err(e) = self.inner.store.save(&podcasts).await {
            self.state().list_dirty = true;
            return Err(e);
        }
        Ok(())
    }

    /// Cancel every load and stop the background sweep
    ///
    /// Listeners of cancelled feed loads receive
    /// [`PodcastLoadListener::on_podcast_load_cancelled`].
    pub fn shutdown(&self) {
        let tasks: Vec<LoadTask> = {
            let mut state = self.state();
            state.logo_loads.clear();
            let tasks: Vec<LoadTask> = state.loads.drain().map(|(_, task)| task).collect();
            for task in &tasks {
                if let Some(podcast) = state.podcasts.find_mut(task.podcast.url.as_str()) {
                    podcast.load_state = LoadState::NotLoading;
                }
            }
            tasks
        };

        self.inner.shutdown.cancel();
        info!(cancelled = tasks.len(), "Podcast manager shut down");
        for task in tasks {
            self.send(Message::Cancelled {
                listeners: task.listeners.snapshot(),
                podcast: Box::new(task.podcast),
            });
        }
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Progress {
                key,
                generation,
                progress,
            } => self.report_progress(&key, generation, progress),
            Message::FeedDone {
                key,
                generation,
                podcast,
                result,
            } => self.finish_load(&key, generation, *podcast, result),
            Message::Cached { podcast, listener } => self.deliver_loaded(&podcast, &[listener]),
            Message::Cancelled { podcast, listeners } => notify_cancelled(&podcast, &listeners),
            Message::ListChanged { podcast, added } => {
                for listener in self.inner.list_listeners.snapshot() {
                    if added {
                        listener.on_podcast_added(&podcast);
                    } else {
                        listener.on_podcast_removed(&podcast);
                    }
                }
            }
            Message::LogoDone { key, result } => self.finish_logo(&key, result),
        }
    }
}

impl EpisodeLookup for PodcastManager {
    fn find_episode(&self, media_url: &str) -> Option<Episode> {
        PodcastManager::find_episode(self, media_url)
    }
}

fn notify_cancelled(podcast: &Podcast, listeners: &[Arc<dyn PodcastLoadListener>]) {
    for listener in listeners {
        listener.on_podcast_load_cancelled(podcast);
    }
}

/// Run the coordinator until every sender is gone
///
/// Cancellations carry their listeners and are delivered even after the
/// last manager handle was dropped.
fn spawn_coordinator(weak: Weak<Inner>, mut messages: UnboundedReceiver<Message>) {
    tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            if let Message::Cancelled { podcast, listeners } = &message {
                notify_cancelled(podcast, listeners);
                continue;
            }
            let Some(inner) = weak.upgrade() else {
                continue;
            };
            PodcastManager { inner }.dispatch(message);
        }
        debug!("Podcast manager coordinator stopped");
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::listeners::FailureReason;
    use crate::loader::tests::MockHttpClient;
    use crate::opml::{OPML_FILENAME, OpmlStore};
    use crate::policy::{ConnectionType, SharedConnectivity};
    use std::path::Path;
    use tempfile::tempdir;
    use tokio::sync::Notify;
    use url::Url;

    pub(crate) const FEED_URL: &str = "https://example.com/feed.xml";

    pub(crate) const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <rss xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd"><channel>
          <title>Show</title>
          <item><title>One</title><enclosure url="https://example.com/1.mp3"/></item>
        </channel></rss>"#;

    /// Listener that forwards every callback as a line of text
    pub(crate) struct ChannelListener {
        tx: UnboundedSender<String>,
    }

    impl ChannelListener {
        pub(crate) fn new() -> (Arc<Self>, UnboundedReceiver<String>) {
            let (tx, rx) = unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }

        fn push(&self, line: String) {
            let _ = self.tx.send(line);
        }
    }

    impl PodcastLoadListener for ChannelListener {
        fn on_podcast_loaded(&self, podcast: &Podcast) {
            self.push(format!("loaded {} {}", podcast.display_name(), podcast.episodes.len()));
        }

        fn on_podcast_load_failed(&self, podcast: &Podcast, reason: FailureReason) {
            self.push(format!("failed {} {reason:?}", podcast.display_name()));
        }

        fn on_podcast_load_cancelled(&self, podcast: &Podcast) {
            self.push(format!("cancelled {}", podcast.display_name()));
        }
    }

    impl PodcastListListener for ChannelListener {
        fn on_podcast_added(&self, podcast: &Podcast) {
            self.push(format!("added {}", podcast.display_name()));
        }

        fn on_podcast_removed(&self, podcast: &Podcast) {
            self.push(format!("removed {}", podcast.display_name()));
        }
    }

    impl PodcastLogoListener for ChannelListener {
        fn on_logo_loaded(&self, podcast: &Podcast) {
            let len = podcast.logo.as_ref().map_or(0, |logo| logo.len());
            self.push(format!("logo {len}"));
        }

        fn on_logo_failed(&self, _podcast: &Podcast) {
            self.push("logo failed".to_string());
        }
    }

    pub(crate) fn manager_with(
        client: Arc<MockHttpClient>,
        dir: &Path,
        connectivity: SharedConnectivity,
    ) -> PodcastManager {
        PodcastManager::new(
            RemoteLoader::new(client),
            Arc::new(OpmlStore::new(dir.join(OPML_FILENAME))),
            Arc::new(connectivity),
            &Settings::default(),
            dir.join("logos"),
        )
    }

    pub(crate) fn show(name: &str, url: &str) -> Podcast {
        Podcast::new(Some(name.to_string()), Url::parse(url).unwrap())
    }

    pub(crate) fn gated(client: MockHttpClient) -> (Arc<MockHttpClient>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let client = MockHttpClient {
            gate: Some(Arc::clone(&gate)),
            ..client
        };
        (Arc::new(client), gate)
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected_silently() {
        let dir = tempdir().unwrap();
        let manager = manager_with(
            Arc::new(MockHttpClient::default()),
            dir.path(),
            SharedConnectivity::default(),
        );
        let (listener, mut rx) = ChannelListener::new();
        manager.add_list_listener(listener);

        manager.add_podcast(show("Show", FEED_URL)).unwrap();
        assert_eq!(
            manager.add_podcast(show("Other name", "https://EXAMPLE.com/feed.xml")),
            Err(InsertError::Duplicate)
        );
        assert_eq!(
            manager.add_podcast(Podcast::new(None, Url::parse("https://example.org/a").unwrap())),
            Err(InsertError::Unnamed)
        );
        manager.add_podcast(show("Another", "https://example.org/b")).unwrap();

        assert_eq!(rx.recv().await.unwrap(), "added Show");
        assert_eq!(rx.recv().await.unwrap(), "added Another");
        assert_eq!(manager.podcasts().len(), 2);
    }

    #[tokio::test]
    async fn list_is_sorted_and_removal_notifies() {
        let dir = tempdir().unwrap();
        let manager = manager_with(
            Arc::new(MockHttpClient::default()),
            dir.path(),
            SharedConnectivity::default(),
        );
        let (listener, mut rx) = ChannelListener::new();
        manager.add_list_listener(listener);

        manager.add_podcast(show("zebra", "https://example.com/z")).unwrap();
        manager.add_podcast(show("Alpha", "https://example.com/a")).unwrap();
        let names: Vec<_> = manager.podcasts().iter().map(|p| p.display_name().to_string()).collect();
        assert_eq!(names, vec!["Alpha", "zebra"]);

        assert!(manager.remove_podcast("https://example.com/Z").is_some());
        assert!(manager.remove_podcast("https://example.com/z").is_none());

        assert_eq!(rx.recv().await.unwrap(), "added zebra");
        assert_eq!(rx.recv().await.unwrap(), "added Alpha");
        assert_eq!(rx.recv().await.unwrap(), "removed zebra");
    }

    #[tokio::test]
    async fn lookups_are_empty_before_the_list_loads() {
        let dir = tempdir().unwrap();
        let manager = manager_with(
            Arc::new(MockHttpClient::default()),
            dir.path(),
            SharedConnectivity::default(),
        );

        assert!(!manager.is_list_loaded());
        assert!(manager.podcasts().is_empty());
        assert!(manager.find_podcast(FEED_URL).is_none());
        assert!(manager.find_episode("https://example.com/1.mp3").is_none());
    }

    #[tokio::test]
    async fn podcast_list_survives_save_and_load() {
        let dir = tempdir().unwrap();
        let client = Arc::new(MockHttpClient::default());
        let manager = manager_with(client.clone(), dir.path(), SharedConnectivity::default());
        manager.add_podcast(show("Show", FEED_URL)).unwrap();
        manager.add_podcast(show("Other", "https://example.org/rss")).unwrap();
        manager.save_podcast_list().await.unwrap();

        let reopened = manager_with(client, dir.path(), SharedConnectivity::default());
        reopened.load_podcast_list().await;

        assert!(reopened.is_list_loaded());
        let pairs: Vec<_> = reopened
            .podcasts()
            .iter()
            .map(|p| (p.display_name().to_string(), p.url.to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Other".to_string(), "https://example.org/rss".to_string()),
                ("Show".to_string(), FEED_URL.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unreadable_list_loads_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(OPML_FILENAME), "<opml><body><outline></opml>").unwrap();
        let manager = manager_with(
            Arc::new(MockHttpClient::default()),
            dir.path(),
            SharedConnectivity::default(),
        );

        manager.load_podcast_list().await;

        assert!(manager.is_list_loaded());
        assert!(manager.podcasts().is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_loads_without_failures() {
        let dir = tempdir().unwrap();
        let (client, _gate) = gated(MockHttpClient::with(FEED_URL, 200, FEED.as_bytes()));
        let manager = manager_with(client, dir.path(), SharedConnectivity::default());
        manager.add_podcast(show("Show", FEED_URL)).unwrap();
        let (listener, mut rx) = ChannelListener::new();

        let podcast = manager.find_podcast(FEED_URL).unwrap();
        assert_eq!(manager.load(&podcast, listener), LoadRequest::Started);
        manager.shutdown();

        assert_eq!(rx.recv().await.unwrap(), "cancelled Show");
        assert_eq!(manager.in_flight(), 0);
        assert_eq!(
            manager.find_podcast(FEED_URL).unwrap().load_state,
            LoadState::NotLoading
        );

        drop(manager);
        assert!(rx.recv().await.is_none());
    }
}
