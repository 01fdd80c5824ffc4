//! datagate.toml configuration parser.
//!
//! Every field is optional: a missing field falls back to the owning
//! component's default (`PoolConfig::default()`, `CacheConfig::default()`,
//! `OptimizerConfig::default()`). Environment variables override the file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataGateConfig {
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub optimizer: OptimizerSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub acquire_timeout_millis: Option<u64>,
    pub idle_timeout_millis: Option<u64>,
    pub reap_interval_millis: Option<u64>,
    pub query_timeout_millis: Option<u64>,
    pub latency_window: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub default_ttl_secs: Option<u64>,
    pub max_memory_size: Option<usize>,
    pub cleanup_interval_millis: Option<u64>,
    pub eviction_target_ratio: Option<f64>,
    pub external_timeout_millis: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub slow_query_threshold_millis: Option<u64>,
    pub cache_expiry_millis: Option<u64>,
    pub max_cache_size: Option<usize>,
    pub eviction_fraction: Option<f64>,
}

impl DataGateConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A fully populated config carrying the built-in defaults.
    pub fn scaffold() -> Self {
        DataGateConfig {
            pool: PoolSettings {
                min: Some(2),
                max: Some(10),
                acquire_timeout_millis: Some(30_000),
                idle_timeout_millis: Some(30_000),
                reap_interval_millis: Some(1_000),
                query_timeout_millis: None,
                latency_window: Some(100),
            },
            cache: CacheSettings {
                default_ttl_secs: Some(300),
                max_memory_size: Some(100 * 1024 * 1024),
                cleanup_interval_millis: Some(60_000),
                eviction_target_ratio: Some(0.8),
                external_timeout_millis: Some(500),
            },
            optimizer: OptimizerSettings {
                slow_query_threshold_millis: Some(1_000),
                cache_expiry_millis: Some(300_000),
                max_cache_size: Some(1_000),
                eviction_fraction: Some(0.1),
            },
        }
    }

    /// Apply `DATAGATE_*` overrides from the process environment.
    pub fn apply_process_env(&mut self) -> ConfigResult<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `DATAGATE_*` overrides using `lookup` to read variables.
    ///
    /// Unset variables leave the current value untouched; set but
    /// unparseable variables are rejected.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pool = &mut self.pool;
        override_from(&lookup, "DATAGATE_POOL_MIN", &mut pool.min)?;
        override_from(&lookup, "DATAGATE_POOL_MAX", &mut pool.max)?;
        override_from(&lookup, "DATAGATE_POOL_ACQUIRE_TIMEOUT_MS", &mut pool.acquire_timeout_millis)?;
        override_from(&lookup, "DATAGATE_POOL_IDLE_TIMEOUT_MS", &mut pool.idle_timeout_millis)?;
        override_from(&lookup, "DATAGATE_POOL_REAP_INTERVAL_MS", &mut pool.reap_interval_millis)?;
        override_from(&lookup, "DATAGATE_POOL_QUERY_TIMEOUT_MS", &mut pool.query_timeout_millis)?;

        let cache = &mut self.cache;
        override_from(&lookup, "DATAGATE_CACHE_DEFAULT_TTL_SECS", &mut cache.default_ttl_secs)?;
        override_from(&lookup, "DATAGATE_CACHE_MAX_MEMORY", &mut cache.max_memory_size)?;
        override_from(&lookup, "DATAGATE_CACHE_CLEANUP_INTERVAL_MS", &mut cache.cleanup_interval_millis)?;

        let optimizer = &mut self.optimizer;
        override_from(&lookup, "DATAGATE_SLOW_QUERY_MS", &mut optimizer.slow_query_threshold_millis)?;
        override_from(&lookup, "DATAGATE_QUERY_CACHE_EXPIRY_MS", &mut optimizer.cache_expiry_millis)?;
        override_from(&lookup, "DATAGATE_QUERY_CACHE_SIZE", &mut optimizer.max_cache_size)?;
        Ok(())
    }
}

fn override_from<F, T>(lookup: &F, key: &str, slot: &mut Option<T>) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        let parsed = raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;
        *slot = Some(parsed);
    }
    Ok(())
}
