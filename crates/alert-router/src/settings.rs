//! Engine settings.
//!
//! [`RouterSettings`] gathers the intervals and defaults the service and
//! its per-organization servers run with. Durations are written as
//! human-readable strings such as `30s` or `1h 30m`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{GlobalConfig, RouteConfig};

/// Top-level settings for the routing engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterSettings {
    /// How often configurations are reconciled against running servers.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Global settings applied to every organization's configuration.
    #[serde(default)]
    pub global: GlobalConfig,
    /// Root route grouping and timing defaults.
    #[serde(default)]
    pub route: RouteConfig,
    /// Silence maintenance.
    #[serde(default)]
    pub silences: RetentionSettings,
    /// Notification-log maintenance.
    #[serde(default)]
    pub nflog: RetentionSettings,
    /// Rule state history sweeping.
    #[serde(default)]
    pub state_history: StateHistorySettings,
    /// Planned-maintenance refresh.
    #[serde(default = "default_maintenance_refresh", with = "humantime_serde")]
    pub maintenance_refresh_interval: Duration,
    /// Dispatcher flush granularity.
    #[serde(default = "default_dispatch_tick", with = "humantime_serde")]
    pub dispatch_tick: Duration,
    /// Link back to the alerting UI attached to notifications.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_url: String,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            global: GlobalConfig::default(),
            route: RouteConfig::default(),
            silences: RetentionSettings::default(),
            nflog: RetentionSettings::default(),
            state_history: StateHistorySettings::default(),
            maintenance_refresh_interval: default_maintenance_refresh(),
            dispatch_tick: default_dispatch_tick(),
            external_url: String::new(),
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_maintenance_refresh() -> Duration {
    Duration::from_secs(60)
}

fn default_dispatch_tick() -> Duration {
    Duration::from_secs(1)
}

/// Garbage collection and snapshot cadence for silences or the notification log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionSettings {
    /// Interval between GC plus snapshot passes.
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
    /// How long expired entries are kept.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(15 * 60),
            retention: Duration::from_secs(120 * 60 * 60),
        }
    }
}

/// Rule state history settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateHistorySettings {
    /// Interval between stale-series sweeps.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for StateHistorySettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl StateHistorySettings {
    /// Series not seen for this long are considered resolved.
    ///
    /// Twice the resolve timeout, or ten minutes when the timeout is zero.
    #[must_use]
    pub fn stale_timeout(resolve_timeout: Duration) -> Duration {
        if resolve_timeout.is_zero() {
            Duration::from_secs(10 * 60)
        } else {
            resolve_timeout * 2
        }
    }
}
