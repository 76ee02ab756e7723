//! Configuration: reservation timing policy and sweep scheduling.
//!
//! Everything has a default, so an empty JSON object is a valid config file.

use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reservation timing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationPolicy {
    /// Lifetime of a new reservation when the caller gives no expiry.
    pub hold_days: u32,

    /// Validity window granted to a reservation when it is promoted to Ready.
    pub pickup_days: u32,
}

impl ReservationPolicy {
    pub fn hold_period(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.hold_days))
    }

    pub fn pickup_window(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.pickup_days))
    }
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            hold_days: 7,
            pickup_days: 7,
        }
    }
}

/// How often the periodic sweep runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub interval_secs: u64,
}

impl SweepSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldshelfConfig {
    pub policy: ReservationPolicy,
    pub sweep: SweepSettings,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HoldshelfConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_seven_day_hold() {
        let config = HoldshelfConfig::default();

        assert_eq!(config.policy.hold_period(), TimeDelta::days(7));
        assert_eq!(config.policy.pickup_window(), TimeDelta::days(7));
        assert_eq!(config.sweep.interval(), Duration::from_secs(60));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config: HoldshelfConfig =
            serde_json::from_str(r#"{ "policy": { "pickup_days": 3 } }"#).unwrap();

        assert_eq!(config.policy.hold_days, 7);
        assert_eq!(config.policy.pickup_days, 3);
        assert_eq!(config.sweep, SweepSettings::default());
    }

    #[test]
    fn zero_interval_is_clamped() {
        let settings = SweepSettings { interval_secs: 0 };
        assert_eq!(settings.interval(), Duration::from_secs(1));
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = HoldshelfConfig::from_json_file("/nonexistent/holdshelf.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/holdshelf.json"));
    }
}
