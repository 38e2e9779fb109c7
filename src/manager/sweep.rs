// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::listeners::{FailureReason, PodcastLoadListener};
use crate::model::Podcast;

use super::{LoadRequest, PodcastManager};

/// Listener for loads nobody asked for; only logs the outcome
struct SweepListener;

impl PodcastLoadListener for SweepListener {
    fn on_podcast_loaded(&self, podcast: &Podcast) {
        debug!(url = %podcast.url, "Background refresh finished");
    }

    fn on_podcast_load_failed(&self, podcast: &Podcast, reason: FailureReason) {
        debug!(url = %podcast.url, ?reason, "Background refresh failed");
    }
}

impl PodcastManager {
    /// Start loads for podcasts that will be stale before the next sweep
    ///
    /// Nothing happens offline. No load starts while the number of loads in
    /// flight is at the sweep ceiling. Returns how many loads were started.
    pub fn refresh_stale(&self) -> usize {
        let connection = self.inner.connectivity.connection_type();
        if !connection.is_online() {
            return 0;
        }

        let now = Utc::now();
        let policy = self.inner.sweep;
        let candidates: Vec<Podcast> = {
            let state = self.state();
            state
                .podcasts
                .iter()
                .filter(|podcast| !state.loads.contains_key(&podcast.key()))
                .filter(|podcast| {
                    self.inner
                        .freshness
                        .will_be_stale_within(podcast, connection, now, policy.interval)
                })
                .cloned()
                .collect()
        };

        let listener: Arc<dyn PodcastLoadListener> = Arc::new(SweepListener);
        let mut started = 0;
        for podcast in candidates {
            if self.in_flight() >= policy.max_in_flight {
                debug!(in_flight = self.in_flight(), "Sweep ceiling reached");
                break;
            }
            if self.start_load(&podcast, Arc::clone(&listener), true) == LoadRequest::Started {
                started += 1;
            }
        }
        started
    }

    /// Run [`PodcastManager::refresh_stale`] every sweep interval
    ///
    /// The task ends on [`PodcastManager::shutdown`] or once every manager
    /// handle is dropped.
    pub fn spawn_refresh_sweep(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.sweep.interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                let started = PodcastManager { inner }.refresh_stale();
                if started > 0 {
                    info!(started, "Background refresh started");
                }
            }
            debug!("Refresh sweep stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{FEED, FEED_URL, gated, manager_with, show};
    use super::*;
    use crate::loader::tests::MockHttpClient;
    use crate::policy::{ConnectionType, SharedConnectivity};
    use chrono::TimeDelta;
    use tempfile::tempdir;

    #[tokio::test]
    async fn sweep_respects_the_in_flight_ceiling() {
        let dir = tempdir().unwrap();
        let (client, _gate) = gated(MockHttpClient::default());
        let manager = manager_with(client, dir.path(), SharedConnectivity::default());
        for n in 0..5 {
            manager
                .add_podcast(show(&format!("Show {n}"), &format!("https://example.com/{n}.xml")))
                .unwrap();
        }

        assert_eq!(manager.refresh_stale(), 3);
        assert_eq!(manager.in_flight(), 3);
        assert_eq!(manager.refresh_stale(), 0);

        manager.shutdown();
    }

    #[tokio::test]
    async fn sweep_skips_fresh_podcasts_and_offline() {
        let dir = tempdir().unwrap();
        let client = Arc::new(MockHttpClient::with(FEED_URL, 200, FEED.as_bytes()));
        let connectivity = SharedConnectivity::default();
        let manager = manager_with(client.clone(), dir.path(), connectivity.clone());

        let mut fresh = show("Fresh", FEED_URL);
        fresh.last_loaded = Some(Utc::now());
        manager.add_podcast(fresh).unwrap();
        let mut expiring = show("Expiring", "https://example.com/expiring.xml");
        expiring.last_loaded = Some(Utc::now() - TimeDelta::minutes(28));
        manager.add_podcast(expiring).unwrap();

        connectivity.set(ConnectionType::Offline);
        assert_eq!(manager.refresh_stale(), 0);

        connectivity.set(ConnectionType::Wifi);
        assert_eq!(manager.refresh_stale(), 1);
        assert!(manager.find_podcast("https://example.com/expiring.xml").unwrap().is_loading());
        assert!(!manager.find_podcast(FEED_URL).unwrap().is_loading());
    }

    #[tokio::test]
    async fn sweep_task_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let manager = manager_with(
            Arc::new(MockHttpClient::default()),
            dir.path(),
            SharedConnectivity::default(),
        );

        let handle = manager.spawn_refresh_sweep();
        manager.shutdown();

        handle.await.unwrap();
    }
}
