//! Runtime optimizer configuration.

use std::time::Duration;

use datagate_core::config::OptimizerSettings;

/// Configuration for the [`crate::QueryOptimizer`].
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Executions slower than this are recorded as slow queries and never cached (default: 1s).
    pub slow_query_threshold: Duration,
    /// How long a cached result stays servable (default: 5 min).
    pub cache_expiry: Duration,
    /// Result cache capacity; 0 disables result caching (default: 1000).
    pub max_cache_size: usize,
    /// Share of the result cache dropped, oldest first, when it is full (default: 0.1).
    pub eviction_fraction: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold: Duration::from_millis(1000),
            cache_expiry: Duration::from_secs(300),
            max_cache_size: 1000,
            eviction_fraction: 0.1,
        }
    }
}

impl OptimizerConfig {
    /// Build from the `[optimizer]` section of datagate.toml, defaulting missing fields.
    pub fn from_settings(settings: &OptimizerSettings) -> Self {
        let defaults = Self::default();
        Self {
            slow_query_threshold: settings
                .slow_query_threshold_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.slow_query_threshold),
            cache_expiry: settings
                .cache_expiry_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_expiry),
            max_cache_size: settings.max_cache_size.unwrap_or(defaults.max_cache_size),
            eviction_fraction: settings
                .eviction_fraction
                .unwrap_or(defaults.eviction_fraction)
                .clamp(0.0, 1.0),
        }
    }

    /// Entries dropped per eviction round; always at least one.
    pub fn eviction_batch(&self) -> usize {
        let batch = (self.max_cache_size as f64 * self.eviction_fraction).ceil() as usize;
        batch.clamp(1, self.max_cache_size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimizer_config_defaults() {
        let config = OptimizerConfig::default();
        assert_eq!(config.slow_query_threshold, Duration::from_secs(1));
        assert_eq!(config.cache_expiry, Duration::from_secs(300));
        assert_eq!(config.max_cache_size, 1000);
        assert_eq!(config.eviction_batch(), 100);
    }

    #[test]
    fn from_settings_overrides_and_clamps() {
        let settings = OptimizerSettings {
            slow_query_threshold_millis: Some(250),
            cache_expiry_millis: None,
            max_cache_size: Some(20),
            eviction_fraction: Some(3.0),
        };
        let config = OptimizerConfig::from_settings(&settings);
        assert_eq!(config.slow_query_threshold, Duration::from_millis(250));
        assert_eq!(config.cache_expiry, Duration::from_secs(300));
        assert_eq!(config.eviction_fraction, 1.0);
        assert_eq!(config.eviction_batch(), 20);
    }

    #[test]
    fn eviction_batch_is_never_zero() {
        let config = OptimizerConfig {
            max_cache_size: 5,
            eviction_fraction: 0.0,
            ..OptimizerConfig::default()
        };
        assert_eq!(config.eviction_batch(), 1);
    }
}
