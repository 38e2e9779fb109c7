// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, Mutex};

use crate::model::Podcast;
use crate::progress::LoadProgress;

/// Why a podcast load ended without a usable episode list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Network, HTTP or parse failure
    LoadFailed,
    /// The feed is marked explicit and explicit content is blocked
    ExplicitContentBlocked,
}

/// Observer of a single podcast load
///
/// Every load ends with exactly one of `on_podcast_loaded`,
/// `on_podcast_load_failed` or `on_podcast_load_cancelled`.
pub trait PodcastLoadListener: Send + Sync {
    fn on_podcast_loading(&self, _podcast: &Podcast, _progress: LoadProgress) {}

    fn on_podcast_loaded(&self, podcast: &Podcast);

    fn on_podcast_load_failed(&self, podcast: &Podcast, reason: FailureReason);

    fn on_podcast_load_cancelled(&self, _podcast: &Podcast) {}
}

/// Observer of podcast list membership
pub trait PodcastListListener: Send + Sync {
    fn on_podcast_added(&self, podcast: &Podcast);

    fn on_podcast_removed(&self, podcast: &Podcast);
}

/// Observer of logo loads
pub trait PodcastLogoListener: Send + Sync {
    fn on_logo_loaded(&self, podcast: &Podcast);

    fn on_logo_failed(&self, _podcast: &Podcast) {}
}

/// Observer of episode downloads, keyed by media URL
pub trait EpisodeDownloadListener: Send + Sync {
    fn on_download_progress(&self, _media_url: &str, _percent: u8) {}

    fn on_download_success(&self, media_url: &str);

    fn on_download_failed(&self, media_url: &str, reason: &str);

    fn on_download_deleted(&self, _media_url: &str) {}
}

/// Registered listeners, unique by `Arc` identity
///
/// Adding the same listener twice has no effect. Iteration order is
/// unspecified.
pub struct ListenerSet<T: ?Sized> {
    listeners: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`; returns false if it was already present
    pub fn add(&self, listener: Arc<T>) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    /// Unregister `listener`; returns false if it was not present
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Copy of the current listeners, so callbacks run without the lock
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.listeners
            .lock()
            .map(|listeners| listeners.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl PodcastListListener for Counter {
        fn on_podcast_added(&self, _podcast: &Podcast) {}
        fn on_podcast_removed(&self, _podcast: &Podcast) {}
    }

    #[test]
    fn registration_is_idempotent() {
        let set: ListenerSet<dyn PodcastListListener> = ListenerSet::new();
        let a: Arc<dyn PodcastListListener> = Arc::new(Counter);
        let b: Arc<dyn PodcastListListener> = Arc::new(Counter);

        assert!(set.add(Arc::clone(&a)));
        assert!(!set.add(Arc::clone(&a)));
        assert!(set.add(Arc::clone(&b)));
        assert_eq!(set.len(), 2);

        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.snapshot().len(), 1);
    }
}
