//! Runtime pool configuration.

use std::time::Duration;

use datagate_core::ConfigError;
use datagate_core::config::PoolSettings;

/// Configuration for the [`crate::ConnectionPool`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections created at initialize and kept through idle reaping (default: 2).
    pub min: usize,
    /// Hard ceiling on live connections (default: 10).
    pub max: usize,
    /// Longest an `acquire` waits for a connection (default: 30s).
    pub acquire_timeout: Duration,
    /// Idle connections older than this are reaped down to `min` (default: 30s).
    pub idle_timeout: Duration,
    /// How often the reaper runs (default: 1s).
    pub reap_interval: Duration,
    /// Per-query execution limit for `query()`; `None` waits indefinitely.
    pub query_timeout: Option<Duration>,
    /// Number of recent query durations kept for latency averages (default: 100).
    pub latency_window: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 2,
            max: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(1),
            query_timeout: None,
            latency_window: 100,
        }
    }
}

impl PoolConfig {
    /// Build from the `[pool]` section of datagate.toml, defaulting missing fields.
    pub fn from_settings(settings: &PoolSettings) -> Self {
        let defaults = Self::default();
        Self {
            min: settings.min.unwrap_or(defaults.min),
            max: settings.max.unwrap_or(defaults.max),
            acquire_timeout: settings
                .acquire_timeout_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: settings
                .idle_timeout_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_timeout),
            reap_interval: settings
                .reap_interval_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.reap_interval),
            query_timeout: settings
                .query_timeout_millis
                .map(Duration::from_millis)
                .or(defaults.query_timeout),
            latency_window: settings.latency_window.unwrap_or(defaults.latency_window),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max == 0 {
            return Err(ConfigError::Invalid("pool max must be at least 1".to_string()));
        }
        if self.min > self.max {
            return Err(ConfigError::Invalid(format!(
                "pool min ({}) exceeds max ({})",
                self.min, self.max
            )));
        }
        if self.latency_window == 0 {
            return Err(ConfigError::Invalid("latency window must be at least 1".to_string()));
        }
        Ok(())
    }
}
