//! Runtime cache configuration.

use std::time::Duration;

use datagate_core::config::CacheSettings;

/// Configuration for the [`crate::CacheManager`].
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one (default: 300s).
    pub default_ttl: Duration,
    /// Local-tier memory ceiling in bytes (default: 100 MiB).
    pub max_memory_size: usize,
    /// Interval between background sweeps (default: 60s).
    pub cleanup_interval: Duration,
    /// Eviction stops once usage is at or below this share of the ceiling (default: 0.8).
    pub eviction_target_ratio: f64,
    /// Upper bound on any single external-tier call (default: 500ms).
    pub external_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            max_memory_size: 100 * 1024 * 1024,
            cleanup_interval: Duration::from_secs(60),
            eviction_target_ratio: 0.8,
            external_timeout: Duration::from_millis(500),
        }
    }
}

impl CacheConfig {
    /// Build from the `[cache]` section of datagate.toml, defaulting missing fields.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        let defaults = Self::default();
        Self {
            default_ttl: settings
                .default_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_ttl),
            max_memory_size: settings.max_memory_size.unwrap_or(defaults.max_memory_size),
            cleanup_interval: settings
                .cleanup_interval_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.cleanup_interval),
            eviction_target_ratio: settings
                .eviction_target_ratio
                .map(|r| r.clamp(0.0, 1.0))
                .unwrap_or(defaults.eviction_target_ratio),
            external_timeout: settings
                .external_timeout_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.external_timeout),
        }
    }

    /// Byte count eviction drives usage down to.
    pub fn eviction_target(&self) -> usize {
        (self.max_memory_size as f64 * self.eviction_target_ratio) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.max_memory_size, 100 * 1024 * 1024);
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert!(config.eviction_target().abs_diff(80 * 1024 * 1024) <= 1);
    }

    #[test]
    fn from_settings_overrides_and_clamps() {
        let settings = CacheSettings {
            default_ttl_secs: Some(5),
            max_memory_size: Some(1000),
            eviction_target_ratio: Some(1.7),
            ..CacheSettings::default()
        };
        let config = CacheConfig::from_settings(&settings);
        assert_eq!(config.default_ttl, Duration::from_secs(5));
        assert_eq!(config.max_memory_size, 1000);
        assert_eq!(config.eviction_target(), 1000);
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
    }
}
