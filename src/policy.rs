// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::Podcast;
use crate::settings::FreshnessSettings;

/// Kind of network the device is currently on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionType {
    Offline,
    #[default]
    Wifi,
    Ethernet,
    Mobile,
}

impl ConnectionType {
    pub fn is_online(self) -> bool {
        self != ConnectionType::Offline
    }

    /// Unmetered, high-bandwidth connections
    pub fn is_fast(self) -> bool {
        matches!(self, ConnectionType::Wifi | ConnectionType::Ethernet)
    }
}

/// Source of the current connection type
pub trait Connectivity: Send + Sync {
    fn connection_type(&self) -> ConnectionType;
}

/// Connectivity whose value is set by the embedding application
#[derive(Debug, Clone, Default)]
pub struct SharedConnectivity {
    current: Arc<RwLock<ConnectionType>>,
}

impl SharedConnectivity {
    pub fn new(connection: ConnectionType) -> Self {
        Self {
            current: Arc::new(RwLock::new(connection)),
        }
    }

    pub fn set(&self, connection: ConnectionType) {
        if let Ok(mut current) = self.current.write() {
            *current = connection;
        }
    }
}

impl Connectivity for SharedConnectivity {
    fn connection_type(&self) -> ConnectionType {
        self.current
            .read()
            .map(|current| *current)
            .unwrap_or(ConnectionType::Offline)
    }
}

/// Decides whether a podcast's cached episode list must be reloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub fast_ttl: Duration,
    pub slow_ttl: Duration,
    pub logo_ttl: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::from_settings(&FreshnessSettings::default())
    }
}

impl FreshnessPolicy {
    /// Oversized settings saturate instead of overflowing
    pub fn from_settings(settings: &FreshnessSettings) -> Self {
        Self {
            fast_ttl: Duration::from_secs(settings.fast_ttl_mins.saturating_mul(60)),
            slow_ttl: Duration::from_secs(settings.slow_ttl_mins.saturating_mul(60)),
            logo_ttl: Duration::from_secs(settings.logo_ttl_hours.saturating_mul(3600)),
        }
    }

    /// Time-to-live of a loaded feed on `connection`
    pub fn ttl(&self, connection: ConnectionType) -> Duration {
        if connection.is_fast() {
            self.fast_ttl
        } else {
            self.slow_ttl
        }
    }

    /// Whether the podcast needs a reload at `now`
    ///
    /// Never-loaded podcasts are always stale; loaded podcasts are never
    /// stale while offline.
    pub fn is_stale(&self, podcast: &Podcast, connection: ConnectionType, now: DateTime<Utc>) -> bool {
        self.will_be_stale_within(podcast, connection, now, Duration::ZERO)
    }

    /// Whether the podcast is stale at `now + margin`
    pub fn will_be_stale_within(
        &self,
        podcast: &Podcast,
        connection: ConnectionType,
        now: DateTime<Utc>,
        margin: Duration,
    ) -> bool {
        let Some(last_loaded) = podcast.last_loaded else {
            return true;
        };
        if !connection.is_online() {
            return false;
        }

        let elapsed = (now - last_loaded).to_std().unwrap_or(Duration::ZERO);
        elapsed.saturating_add(margin) > self.ttl(connection)
    }

    /// `max-stale` hint for feed requests on `connection`
    pub fn max_stale(&self, connection: ConnectionType) -> Duration {
        self.ttl(connection)
    }

    /// Whether a logo cached at `cached_at` may be served at `now`
    pub fn is_logo_fresh(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - cached_at).to_std().unwrap_or(Duration::ZERO) <= self.logo_ttl
    }
}

/// Limits of the periodic background refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    pub interval: Duration,
    /// No loads are started while this many are already in flight
    pub max_in_flight: usize,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self::from_settings(&FreshnessSettings::default())
    }
}

impl SweepPolicy {
    pub fn from_settings(settings: &FreshnessSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.sweep_interval_mins.saturating_mul(60)),
            max_in_flight: settings.sweep_max_in_flight,
        }
    }
}
