//! CacheManager — tiered cache with fail-open external tier.
//!
//! Reads consult the external tier first and fall back to the local store;
//! writes go to both. The local store is the backstop: it is written on every
//! `set` so a flaky external tier never loses data the process just cached.
//!
//! No lock is held across an external-tier call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::external::{ExternalCache, ExternalFuture};
use crate::local::{LocalStore, Lookup, expires_at};

/// TTL used for the synthetic health-check key.
const HEALTH_CHECK_TTL: Duration = Duration::from_secs(10);

/// Counters updated lock-free on the hot path.
#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    external_errors: AtomicU64,
    health_probes: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub sets: u64,
    pub deletes: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub external_errors: u64,
    pub entries: usize,
    pub memory_usage: usize,
    pub max_memory_size: usize,
    pub external_enabled: bool,
}

/// Result of one cleanup pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed because their TTL elapsed.
    pub expired: usize,
    /// Entries evicted to get back under the memory target.
    pub evicted: usize,
    /// Local-tier usage after the pass.
    pub memory_usage: usize,
}

/// Outcome of [`CacheManager::health_check`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub healthy: bool,
    /// The set → get → delete round trip through the manager succeeded.
    pub round_trip_ok: bool,
    /// Direct probe of the external tier; `None` when no tier is configured.
    pub external_ok: Option<bool>,
}

/// Background sweep task and its shutdown signal.
struct SweepTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Tiered cache: optional external tier over a memory-budgeted local store.
pub struct CacheManager {
    config: CacheConfig,
    external: Option<Arc<dyn ExternalCache>>,
    local: Mutex<LocalStore>,
    counters: Counters,
    sweeper: Mutex<Option<SweepTask>>,
}

impl CacheManager {
    /// Create a local-only cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            external: None,
            local: Mutex::new(LocalStore::new()),
            counters: Counters::default(),
            sweeper: Mutex::new(None),
        }
    }

    /// Attach an external tier.
    pub fn with_external(mut self, external: Arc<dyn ExternalCache>) -> Self {
        self.external = Some(external);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn external_enabled(&self) -> bool {
        self.external.is_some()
    }

    /// Run an external-tier call, absorbing errors and timeouts.
    async fn external_call<T>(&self, op: &'static str, key: &str, call: ExternalFuture<'_, T>) -> Option<T> {
        match tokio::time::timeout(self.config.external_timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.counters.external_errors.fetch_add(1, Ordering::Relaxed);
                warn!(op, key, error = %e, "external cache tier failed, falling back to local");
                None
            }
            Err(_) => {
                self.counters.external_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    op,
                    key,
                    timeout = ?self.config.external_timeout,
                    "external cache tier timed out, falling back to local"
                );
                None
            }
        }
    }

    /// Look up `key`, external tier first.
    ///
    /// Returns `None` on a miss in both tiers or when the local entry has
    /// expired (the expired entry is purged).
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(external) = &self.external {
            if let Some(Some(value)) = self.external_call("get", key, external.get(key)).await {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, tier = "external", "cache hit");
                return Some(value);
            }
        }

        let lookup = self.local.lock().await.get(key, Instant::now());
        match lookup {
            Lookup::Hit(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, tier = "local", "cache hit");
                Some(value)
            }
            Lookup::Expired => {
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss (expired)");
                None
            }
            Lookup::Missing => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss");
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl` (or the configured default).
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);

        if let Some(external) = &self.external {
            self.external_call("set", key, external.set(key, &value, ttl)).await;
        }

        let evicted = {
            let mut local = self.local.lock().await;
            local.insert(key, value, expires_at(Instant::now(), ttl));
            if local.memory_usage() > self.config.max_memory_size {
                local.evict_to(self.config.eviction_target())
            } else {
                0
            }
        };
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            info!(key, evicted, "memory ceiling exceeded on set, evicted entries");
        }
        debug!(key, ttl = ?ttl, "cache set");
    }

    /// Remove `key` from both tiers. Returns whether the local tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        if let Some(external) = &self.external {
            self.external_call("delete", key, external.delete(key)).await;
        }
        let removed = self.local.lock().await.remove(key);
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        debug!(key, removed, "cache delete");
        removed
    }

    /// Whether either tier holds a live value for `key`.
    pub async fn exists(&self, key: &str) -> bool {
        if let Some(external) = &self.external {
            if let Some(true) = self.external_call("exists", key, external.exists(key)).await {
                return true;
            }
        }
        self.local.lock().await.contains(key, Instant::now())
    }

    /// Drop every entry from both tiers.
    pub async fn clear(&self) {
        if let Some(external) = &self.external {
            self.external_call("flush_all", "*", external.flush_all()).await;
        }
        self.local.lock().await.clear();
        info!("cache cleared");
    }

    /// Fetch several keys; the result is positionally aligned with `keys`.
    pub async fn mget(&self, keys: &[&str]) -> Vec<Option<Value>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await);
        }
        values
    }

    /// Store several entries with a shared TTL.
    pub async fn mset<I>(&self, entries: I, ttl: Option<Duration>)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        for (key, value) in entries {
            self.set(&key, value, ttl).await;
        }
    }

    /// One cleanup pass: purge expired entries, then evict soonest-expiry
    /// entries until usage is at or below the eviction target.
    pub async fn cleanup(&self) -> SweepReport {
        let report = {
            let mut local = self.local.lock().await;
            let expired = local.purge_expired(Instant::now());
            let evicted = if local.memory_usage() > self.config.eviction_target() {
                local.evict_to(self.config.eviction_target())
            } else {
                0
            };
            SweepReport {
                expired,
                evicted,
                memory_usage: local.memory_usage(),
            }
        };

        self.counters.expirations.fetch_add(report.expired as u64, Ordering::Relaxed);
        self.counters.evictions.fetch_add(report.evicted as u64, Ordering::Relaxed);
        if report.expired > 0 || report.evicted > 0 {
            info!(
                expired = report.expired,
                evicted = report.evicted,
                memory_usage = report.memory_usage,
                max_memory_size = self.config.max_memory_size,
                "cache sweep"
            );
        }
        report
    }

    /// Probe the cache with a set → get → delete round trip.
    ///
    /// Never returns an error: failures are reported as `healthy: false`.
    pub async fn health_check(&self) -> CacheHealth {
        let probe = self.counters.health_probes.fetch_add(1, Ordering::Relaxed);
        let key = format!("__datagate_health__:{probe}");
        let expected = serde_json::json!({ "probe": probe });

        self.set(&key, expected.clone(), Some(HEALTH_CHECK_TTL)).await;
        let read_back = self.get(&key).await;
        self.delete(&key).await;
        let round_trip_ok = read_back.as_ref() == Some(&expected) && !self.exists(&key).await;

        let external_ok = match &self.external {
            Some(external) => Some(self.probe_external(external.as_ref(), &key, &expected).await),
            None => None,
        };

        let healthy = round_trip_ok && external_ok.unwrap_or(true);
        if !healthy {
            warn!(round_trip_ok, ?external_ok, "cache health check failed");
        }
        CacheHealth {
            healthy,
            round_trip_ok,
            external_ok,
        }
    }

    async fn probe_external(&self, external: &dyn ExternalCache, key: &str, expected: &Value) -> bool {
        let set_ok = self
            .external_call("health_set", key, external.set(key, expected, HEALTH_CHECK_TTL))
            .await
            .is_some();
        let read_back = self.external_call("health_get", key, external.get(key)).await;
        let delete_ok = self
            .external_call("health_delete", key, external.delete(key))
            .await
            .is_some();
        set_ok && delete_ok && read_back.flatten().as_ref() == Some(expected)
    }

    /// Snapshot of the cache counters.
    pub async fn stats(&self) -> CacheStats {
        let (entries, memory_usage) = {
            let local = self.local.lock().await;
            (local.len(), local.memory_usage())
        };
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            external_errors: self.counters.external_errors.load(Ordering::Relaxed),
            entries,
            memory_usage,
            max_memory_size: self.config.max_memory_size,
            external_enabled: self.external.is_some(),
        }
    }

    /// Start the periodic cleanup task. Calling it again while running is a no-op.
    pub async fn start_cleanup_task(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);
        let interval = self.config.cleanup_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        cache.cleanup().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("cache cleanup task shutting down");
                        break;
                    }
                }
            }
        });

        *sweeper = Some(SweepTask { handle, shutdown_tx });
        info!(interval = ?interval, "cache cleanup task started");
    }

    /// Stop the cleanup task and drop the local tier.
    ///
    /// The external tier is shared with other processes and is left intact.
    pub async fn shutdown(&self) {
        if let Some(task) = self.sweeper.lock().await.take() {
            let _ = task.shutdown_tx.send(true);
            task.handle.abort();
        }
        self.local.lock().await.clear();
        info!("cache manager shut down");
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("external_enabled", &self.external.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::InMemoryExternalCache;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;

    // ── Mock external tiers ─────────────────────────────────────────

    /// External tier that fails every call.
    struct BrokenTier {
        calls: AtomicU64,
    }

    impl BrokenTier {
        fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
            }
        }

        fn fail<'a, T: Send + 'a>(&'a self) -> ExternalFuture<'a, T> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Box::pin(async { Err("connection reset by peer".to_string()) })
        }
    }

    impl ExternalCache for BrokenTier {
        fn get<'a>(&'a self, _key: &'a str) -> ExternalFuture<'a, Option<Value>> {
            self.fail()
        }
        fn set<'a>(&'a self, _key: &'a str, _value: &'a Value, _ttl: Duration) -> ExternalFuture<'a, ()> {
            self.fail()
        }
        fn delete<'a>(&'a self, _key: &'a str) -> ExternalFuture<'a, ()> {
            self.fail()
        }
        fn exists<'a>(&'a self, _key: &'a str) -> ExternalFuture<'a, bool> {
            self.fail()
        }
        fn flush_all(&self) -> ExternalFuture<'_, ()> {
            self.fail()
        }
    }

    /// External tier whose calls never complete until `stalled` is cleared.
    struct StalledTier {
        stalled: AtomicBool,
    }

    impl ExternalCache for StalledTier {
        fn get<'a>(&'a self, _key: &'a str) -> ExternalFuture<'a, Option<Value>> {
            Box::pin(async move {
                if self.stalled.load(Ordering::Relaxed) {
                    std::future::pending::<()>().await;
                }
                Ok(None)
            })
        }
        fn set<'a>(&'a self, _key: &'a str, _value: &'a Value, _ttl: Duration) -> ExternalFuture<'a, ()> {
            Box::pin(async move {
                if self.stalled.load(Ordering::Relaxed) {
                    std::future::pending::<()>().await;
                }
                Ok(())
            })
        }
        fn delete<'a>(&'a self, _key: &'a str) -> ExternalFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }
        fn exists<'a>(&'a self, _key: &'a str) -> ExternalFuture<'a, bool> {
            Box::pin(async { Ok(false) })
        }
        fn flush_all(&self) -> ExternalFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    fn small_config(max_memory_size: usize) -> CacheConfig {
        CacheConfig {
            max_memory_size,
            ..CacheConfig::default()
        }
    }

    // ── Local tier ──────────────────────────────────────────────────

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.set("user:42", json!({"name": "ada"}), None).await;
        assert_eq!(cache.get("user:42").await, Some(json!({"name": "ada"})));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_ttls_are_clamped() {
        let config = CacheConfig {
            default_ttl: Duration::from_secs(u64::MAX),
            ..CacheConfig::default()
        };
        let cache = CacheManager::new(config).with_external(Arc::new(InMemoryExternalCache::new()));
        cache.set("explicit", json!(1), Some(Duration::MAX)).await;
        cache.set("default", json!(2), None).await;

        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert_eq!(cache.get("explicit").await, Some(json!(1)));
        assert_eq!(cache.get("default").await, Some(json!(2)));
        assert_eq!(cache.cleanup().await.expired, 0);
    }

    #[tokio::test]
    async fn get_missing_counts_miss() {
        let cache = CacheManager::new(CacheConfig::default());
        assert_eq!(cache.get("nope").await, None);
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_makes_entry_absent() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.set("k", json!("v"), Some(Duration::from_secs(1))).await;
        assert_eq!(cache.get("k").await, Some(json!("v")));

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.exists("k").await);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.memory_usage, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_applies_when_none_given() {
        let config = CacheConfig {
            default_ttl: Duration::from_secs(2),
            ..CacheConfig::default()
        };
        let cache = CacheManager::new(config);
        cache.set("k", json!(1), None).await;

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.exists("k").await);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.exists("k").await);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.set("a", json!(1), None).await;
        cache.set("b", json!(2), None).await;

        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);
        assert!(!cache.exists("a").await);
        assert!(cache.exists("b").await);

        cache.clear().await;
        assert!(!cache.exists("b").await);
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.memory_usage, 0);
    }

    #[tokio::test]
    async fn mset_and_mget_preserve_order() {
        let cache = CacheManager::new(CacheConfig::default());
        cache
            .mset(
                vec![
                    ("x".to_string(), json!(1)),
                    ("y".to_string(), json!(2)),
                ],
                None,
            )
            .await;

        let values = cache.mget(&["y", "missing", "x"]).await;
        assert_eq!(values, vec![Some(json!(2)), None, Some(json!(1))]);
    }

    #[tokio::test]
    async fn memory_usage_tracks_overwrites() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.set("k", json!("a".repeat(100)), None).await;
        let big = cache.stats().await.memory_usage;
        cache.set("k", json!("a"), None).await;
        let small = cache.stats().await.memory_usage;
        assert_eq!(big, 1 + 102);
        assert_eq!(small, 1 + 3);
    }

    // ── Sweep and memory ceiling ────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn cleanup_purges_expired_entries() {
        let cache = CacheManager::new(CacheConfig::default());
        cache.set("short", json!(1), Some(Duration::from_secs(1))).await;
        cache.set("long", json!(2), Some(Duration::from_secs(60))).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        let report = cache.cleanup().await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn sweep_brings_usage_under_eighty_percent() {
        // Each entry is ~60 bytes; the set-time ceiling check only fires
        // above max, so fill to just over it.
        let cache = CacheManager::new(small_config(1_000));
        for i in 0..16 {
            let ttl = Duration::from_secs(100 + i);
            cache.set(&format!("key-{i:02}"), json!("v".repeat(50)), Some(ttl)).await;
        }

        let report = cache.cleanup().await;
        assert!(report.memory_usage <= 800, "usage {} over target", report.memory_usage);
        let stats = cache.stats().await;
        assert_eq!(stats.memory_usage, report.memory_usage);
        // Soonest-expiring keys go first.
        assert!(!cache.exists("key-00").await);
        assert!(cache.exists("key-15").await);
    }

    #[tokio::test]
    async fn set_over_ceiling_evicts_immediately() {
        let cache = CacheManager::new(small_config(500));
        for i in 0..20 {
            cache
                .set(&format!("k{i:02}"), json!("x".repeat(40)), Some(Duration::from_secs(10 + i)))
                .await;
        }
        let stats = cache.stats().await;
        assert!(stats.memory_usage <= 500);
        assert!(stats.evictions > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_sweeps_periodically() {
        let config = CacheConfig {
            cleanup_interval: Duration::from_secs(5),
            ..CacheConfig::default()
        };
        let cache = Arc::new(CacheManager::new(config));
        cache.set("k", json!(1), Some(Duration::from_secs(1))).await;
        cache.start_cleanup_task().await;
        cache.start_cleanup_task().await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.stats().await.entries, 0);

        cache.shutdown().await;
        assert!(cache.sweeper.lock().await.is_none());
    }

    // ── External tier ───────────────────────────────────────────────

    #[tokio::test]
    async fn external_tier_answers_first() {
        let tier = Arc::new(InMemoryExternalCache::new());
        tier.set("shared", &json!("from-redis"), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = CacheManager::new(CacheConfig::default()).with_external(tier.clone());

        assert_eq!(cache.get("shared").await, Some(json!("from-redis")));
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn set_writes_both_tiers() {
        let tier = Arc::new(InMemoryExternalCache::new());
        let cache = CacheManager::new(CacheConfig::default()).with_external(tier.clone());
        cache.set("k", json!(7), None).await;

        assert_eq!(tier.get("k").await.unwrap(), Some(json!(7)));
        assert_eq!(cache.stats().await.entries, 1);

        cache.delete("k").await;
        assert_eq!(tier.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn broken_external_tier_falls_back_to_local() {
        let tier = Arc::new(BrokenTier::new());
        let cache = CacheManager::new(CacheConfig::default()).with_external(tier.clone());

        cache.set("k", json!("local"), None).await;
        assert_eq!(cache.get("k").await, Some(json!("local")));
        assert!(cache.exists("k").await);
        assert!(cache.delete("k").await);
        assert_eq!(cache.get("k").await, None);
        cache.clear().await;

        let stats = cache.stats().await;
        assert_eq!(stats.external_errors, tier.calls.load(Ordering::Relaxed));
        assert!(stats.external_errors >= 6);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_external_tier_is_bounded_by_timeout() {
        let tier = Arc::new(StalledTier {
            stalled: AtomicBool::new(true),
        });
        let cache = CacheManager::new(CacheConfig::default()).with_external(tier);

        cache.set("k", json!(1), None).await;
        assert_eq!(cache.get("k").await, Some(json!(1)));
        assert_eq!(cache.stats().await.external_errors, 2);
    }

    // ── Health check ────────────────────────────────────────────────

    #[tokio::test]
    async fn health_check_local_only() {
        let cache = CacheManager::new(CacheConfig::default());
        let health = cache.health_check().await;
        assert!(health.healthy);
        assert!(health.round_trip_ok);
        assert_eq!(health.external_ok, None);
        // The synthetic key does not linger.
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn health_check_with_working_external_tier() {
        let tier = Arc::new(InMemoryExternalCache::new());
        let cache = CacheManager::new(CacheConfig::default()).with_external(tier.clone());
        let health = cache.health_check().await;
        assert!(health.healthy);
        assert_eq!(health.external_ok, Some(true));
        assert!(tier.is_empty().await);
    }

    #[tokio::test]
    async fn health_check_reports_broken_external_tier() {
        let cache = CacheManager::new(CacheConfig::default()).with_external(Arc::new(BrokenTier::new()));
        let health = cache.health_check().await;
        assert!(!health.healthy);
        assert!(health.round_trip_ok);
        assert_eq!(health.external_ok, Some(false));
    }
}
