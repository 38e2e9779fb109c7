// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SettingsError;

/// Name of the optional settings file inside the data directory
pub const SETTINGS_FILENAME: &str = "settings.json";

/// Client settings, read from a JSON file where every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkSettings,
    pub freshness: FreshnessSettings,
    /// Report explicit podcasts as blocked instead of loaded
    pub block_explicit: bool,
}

/// Connection and size limits for remote loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Feeds larger than this are rejected
    pub feed_max_bytes: u64,
    pub logo_max_bytes: u64,
    pub suggestions_max_bytes: u64,
    pub suggestions_url: String,
}

impl NetworkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("podcatcher/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout_secs: 8,
            read_timeout_secs: 60,
            feed_max_bytes: 8 * 1024 * 1024,
            logo_max_bytes: 2 * 1024 * 1024,
            suggestions_max_bytes: 1024 * 1024,
            suggestions_url: "https://podcatcher.example.org/suggestions.json".to_string(),
        }
    }
}

/// Cache lifetimes and background refresh limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessSettings {
    /// Time-to-live of a loaded feed on wifi or ethernet
    pub fast_ttl_mins: u64,
    /// Time-to-live of a loaded feed on mobile connections
    pub slow_ttl_mins: u64,
    pub logo_ttl_hours: u64,
    pub sweep_interval_mins: u64,
    /// The background sweep starts no loads while this many are in flight
    pub sweep_max_in_flight: usize,
    pub max_logo_loads: usize,
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            fast_ttl_mins: 30,
            slow_ttl_mins: 60,
            logo_ttl_hours: 24 * 7,
            sweep_interval_mins: 5,
            sweep_max_in_flight: 3,
            max_logo_loads: 4,
        }
    }
}

impl Settings {
    /// Read settings from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| SettingsError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join(SETTINGS_FILENAME)).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        std::fs::write(
            &path,
            r#"{"block_explicit": true, "freshness": {"fast_ttl_mins": 10}}"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();

        assert!(settings.block_explicit);
        assert_eq!(settings.freshness.fast_ttl_mins, 10);
        assert_eq!(settings.freshness.slow_ttl_mins, 60);
        assert_eq!(settings.network, NetworkSettings::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILENAME);
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::ParseFailed { .. })
        ));
    }
}
