//! QueryOptimizer — analysis, timing, and result caching around an executor.
//!
//! Per query shape (normalized SQL plus serialized params) the optimizer
//! keeps a stat record that is never evicted, and at most one cached
//! result. A shape moves `Unseen → Tracked` on first execution, `Tracked →
//! Cached` when a fast cacheable result is stored, and back to `Tracked`
//! when that result expires, is evicted, or the cache is cleared.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use datagate_cache::CacheManager;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::analyzer::{QueryAnalysis, RiskLevel, StatementKind, Suggestion, analyze_query, normalize_sql};
use crate::config::OptimizerConfig;

/// Number of slow queries listed in a [`PerformanceReport`].
const REPORT_TOP_SLOW: usize = 10;

/// Key prefix for results mirrored into a shared [`CacheManager`].
const SHARED_KEY_PREFIX: &str = "query:";

/// Per-call options for [`QueryOptimizer::execute_optimized_query`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Bypass the result cache for lookup and storage.
    pub skip_cache: bool,
}

/// Where a query shape currently sits in the optimizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryState {
    Unseen,
    Tracked,
    Cached,
}

/// Execution statistics for one query shape.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryStatRecord {
    pub executions: u64,
    pub total_time: Duration,
    pub avg_time: Duration,
    pub min_time: Duration,
    pub max_time: Duration,
    pub cache_hits: u64,
    pub errors: u64,
    pub last_executed: Instant,
}

impl QueryStatRecord {
    fn new(now: Instant) -> Self {
        Self {
            executions: 0,
            total_time: Duration::ZERO,
            avg_time: Duration::ZERO,
            min_time: Duration::MAX,
            max_time: Duration::ZERO,
            cache_hits: 0,
            errors: 0,
            last_executed: now,
        }
    }

    fn record_execution(&mut self, elapsed: Duration, now: Instant) {
        self.executions += 1;
        self.total_time += elapsed;
        let avg_nanos = self.total_time.as_nanos() / u128::from(self.executions);
        self.avg_time = Duration::from_nanos(u64::try_from(avg_nanos).unwrap_or(u64::MAX));
        self.min_time = self.min_time.min(elapsed);
        self.max_time = self.max_time.max(elapsed);
        self.last_executed = now;
    }
}

/// A query shape that has exceeded the slow-query threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct SlowQueryRecord {
    pub sql: String,
    pub params: Vec<Value>,
    pub max_time: Duration,
    pub occurrences: u64,
    pub last_seen: Instant,
    pub suggestions: Vec<Suggestion>,
}

/// Serializable view of a [`SlowQueryRecord`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SlowQuerySummary {
    pub query_hash: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub max_time_ms: f64,
    pub occurrences: u64,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_executions: u64,
    pub total_cache_hits: u64,
    pub cache_hit_rate: f64,
    /// Mean of the per-shape average execution times.
    pub avg_execution_ms: f64,
    pub tracked_queries: usize,
    pub cached_results: usize,
    pub slow_query_count: usize,
    /// Slowest shapes by max observed duration, slowest first.
    pub top_slow_queries: Vec<SlowQuerySummary>,
}

struct CachedResult {
    result: Value,
    cached_at: Instant,
    seq: u64,
}

#[derive(Default)]
struct OptimizerState {
    results: HashMap<String, CachedResult>,
    /// Insertion order of `results`; entries whose seq no longer matches are stale.
    order: VecDeque<(u64, String)>,
    next_seq: u64,
    stats: HashMap<String, QueryStatRecord>,
    slow: HashMap<String, SlowQueryRecord>,
}

impl OptimizerState {
    fn fresh_result(&mut self, hash: &str, expiry: Duration, now: Instant) -> Option<Value> {
        let expired = match self.results.get(hash) {
            Some(entry) if now.duration_since(entry.cached_at) < expiry => {
                return Some(entry.result.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.results.remove(hash);
        }
        None
    }

    fn record_hit(&mut self, hash: &str, now: Instant) {
        let stat = self
            .stats
            .entry(hash.to_string())
            .or_insert_with(|| QueryStatRecord::new(now));
        stat.cache_hits += 1;
        stat.last_executed = now;
    }

    /// Store a result, first dropping the oldest `batch` entries when full.
    fn insert_result(&mut self, hash: String, result: Value, now: Instant, capacity: usize, batch: usize) {
        if capacity == 0 {
            return;
        }
        if !self.results.contains_key(&hash) && self.results.len() >= capacity {
            let mut evicted = 0;
            while evicted < batch {
                let Some((seq, key)) = self.order.pop_front() else {
                    break;
                };
                if self.results.get(&key).is_some_and(|entry| entry.seq == seq) {
                    self.results.remove(&key);
                    evicted += 1;
                }
            }
            debug!(evicted, remaining = self.results.len(), "evicted oldest cached results");
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((seq, hash.clone()));
        self.results.insert(
            hash,
            CachedResult {
                result,
                cached_at: now,
                seq,
            },
        );

        if self.order.len() > capacity.saturating_mul(2) {
            let results = &self.results;
            self.order
                .retain(|(seq, key)| results.get(key).is_some_and(|entry| entry.seq == *seq));
        }
    }

    /// Empty the result cache, returning the hashes it held.
    fn drain_results(&mut self) -> Vec<String> {
        self.order.clear();
        self.results.drain().map(|(hash, _)| hash).collect()
    }

    fn record_slow(&mut self, hash: &str, analysis: &QueryAnalysis, params: &[Value], elapsed: Duration, now: Instant) -> u64 {
        let record = self
            .slow
            .entry(hash.to_string())
            .or_insert_with(|| SlowQueryRecord {
                sql: analysis.optimized_sql.clone(),
                params: params.to_vec(),
                max_time: Duration::ZERO,
                occurrences: 0,
                last_seen: now,
                suggestions: analysis.suggestions.clone(),
            });
        record.occurrences += 1;
        record.max_time = record.max_time.max(elapsed);
        record.last_seen = now;
        record.occurrences
    }
}

/// Analyzes, times, and caches queries run through a caller-supplied executor.
pub struct QueryOptimizer {
    config: OptimizerConfig,
    state: Mutex<OptimizerState>,
    shared_cache: Option<Arc<CacheManager>>,
}

impl QueryOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(OptimizerState::default()),
            shared_cache: None,
        }
    }

    /// Mirror cacheable results into `cache` and consult it on a local miss.
    pub fn with_shared_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Static analysis only; nothing is executed or recorded.
    pub fn analyze_query(&self, sql: &str, params: &[Value]) -> QueryAnalysis {
        analyze_query(sql, params)
    }

    /// Run `sql` through `executor`, serving and storing cached results.
    ///
    /// Executor errors are counted against the query shape and returned
    /// unchanged.
    pub async fn execute_optimized_query<F, Fut, E>(
        &self,
        executor: F,
        sql: &str,
        params: Vec<Value>,
        options: ExecuteOptions,
    ) -> Result<Value, E>
    where
        F: FnOnce(String, Vec<Value>) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        let normalized = normalize_sql(sql);
        let hash = query_hash(&normalized, &params);
        let use_cache = !options.skip_cache
            && self.config.max_cache_size > 0
            && StatementKind::detect(&normalized) == StatementKind::Select;

        if use_cache {
            if let Some(result) = self.cached(&hash).await {
                return Ok(result);
            }
        }

        let analysis = analyze_query(sql, &params);
        if analysis.risk == RiskLevel::High {
            let rules: Vec<&str> = analysis.suggestions.iter().map(|s| s.rule).collect();
            warn!(query_hash = %short(&hash), sql = %analysis.optimized_sql, ?rules, "executing high-risk query");
        }

        let started = Instant::now();
        let outcome = executor(analysis.optimized_sql.clone(), params.clone()).await;
        let elapsed = started.elapsed();
        let now = Instant::now();

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                let mut state = self.state.lock().await;
                let stat = state
                    .stats
                    .entry(hash.clone())
                    .or_insert_with(|| QueryStatRecord::new(now));
                stat.errors += 1;
                stat.last_executed = now;
                drop(state);
                warn!(query_hash = %short(&hash), elapsed = ?elapsed, error = %e, "query execution failed");
                return Err(e);
            }
        };

        let threshold = self.config.slow_query_threshold;
        let cacheable = use_cache && analysis.cacheability_score > 50 && elapsed < threshold;
        {
            let mut state = self.state.lock().await;
            state
                .stats
                .entry(hash.clone())
                .or_insert_with(|| QueryStatRecord::new(now))
                .record_execution(elapsed, now);

            if elapsed > threshold {
                let occurrences = state.record_slow(&hash, &analysis, &params, elapsed, now);
                warn!(
                    query_hash = %short(&hash),
                    sql = %analysis.optimized_sql,
                    elapsed = ?elapsed,
                    occurrences,
                    "slow query"
                );
            }

            if cacheable {
                state.insert_result(
                    hash.clone(),
                    result.clone(),
                    now,
                    self.config.max_cache_size,
                    self.config.eviction_batch(),
                );
            }
        }
        debug!(
            query_hash = %short(&hash),
            elapsed = ?elapsed,
            score = analysis.cacheability_score,
            cached = cacheable,
            "query executed"
        );

        if cacheable {
            if let Some(shared) = &self.shared_cache {
                shared
                    .set(&shared_key(&hash), result.clone(), Some(self.config.cache_expiry))
                    .await;
            }
        }
        Ok(result)
    }

    /// Local result cache first, then the shared tier.
    async fn cached(&self, hash: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let mut state = self.state.lock().await;
            if let Some(result) = state.fresh_result(hash, self.config.cache_expiry, now) {
                state.record_hit(hash, now);
                debug!(query_hash = %short(hash), "query result cache hit");
                return Some(result);
            }
        }

        let shared = self.shared_cache.as_ref()?;
        let result = shared.get(&shared_key(hash)).await?;
        let mut state = self.state.lock().await;
        state.record_hit(hash, now);
        state.insert_result(
            hash.to_string(),
            result.clone(),
            now,
            self.config.max_cache_size,
            self.config.eviction_batch(),
        );
        debug!(query_hash = %short(hash), "shared cache hit");
        Some(result)
    }

    pub async fn performance_report(&self) -> PerformanceReport {
        let state = self.state.lock().await;
        let total_executions: u64 = state.stats.values().map(|s| s.executions).sum();
        let total_cache_hits: u64 = state.stats.values().map(|s| s.cache_hits).sum();
        let served = total_executions + total_cache_hits;
        let cache_hit_rate = if served == 0 {
            0.0
        } else {
            total_cache_hits as f64 / served as f64
        };

        let executed: Vec<&QueryStatRecord> = state.stats.values().filter(|s| s.executions > 0).collect();
        let avg_execution_ms = if executed.is_empty() {
            0.0
        } else {
            executed.iter().map(|s| millis(s.avg_time)).sum::<f64>() / executed.len() as f64
        };

        let mut slow: Vec<(&String, &SlowQueryRecord)> = state.slow.iter().collect();
        slow.sort_by(|a, b| b.1.max_time.cmp(&a.1.max_time));
        let top_slow_queries = slow
            .into_iter()
            .take(REPORT_TOP_SLOW)
            .map(|(hash, record)| SlowQuerySummary {
                query_hash: hash.clone(),
                sql: record.sql.clone(),
                params: record.params.clone(),
                max_time_ms: millis(record.max_time),
                occurrences: record.occurrences,
                suggestions: record.suggestions.clone(),
            })
            .collect();

        PerformanceReport {
            total_executions,
            total_cache_hits,
            cache_hit_rate,
            avg_execution_ms,
            tracked_queries: state.stats.len(),
            cached_results: state.results.len(),
            slow_query_count: state.slow.len(),
            top_slow_queries,
        }
    }

    /// Drop every cached result, including mirrored shared entries.
    pub async fn clear_cache(&self) {
        let hashes = self.state.lock().await.drain_results();
        self.forget_shared(&hashes).await;
        info!(cleared = hashes.len(), "query result cache cleared");
    }

    /// Start over: drop cached results (shared mirrors included) together
    /// with execution and slow-query statistics.
    pub async fn reset_stats(&self) {
        let hashes = {
            let mut state = self.state.lock().await;
            state.stats.clear();
            state.slow.clear();
            state.drain_results()
        };
        self.forget_shared(&hashes).await;
        info!(cleared = hashes.len(), "query statistics reset");
    }

    async fn forget_shared(&self, hashes: &[String]) {
        if let Some(shared) = &self.shared_cache {
            for hash in hashes {
                shared.delete(&shared_key(hash)).await;
            }
        }
    }

    pub async fn query_state(&self, sql: &str, params: &[Value]) -> QueryState {
        let hash = query_hash(&normalize_sql(sql), params);
        let now = Instant::now();
        let state = self.state.lock().await;
        let fresh = state
            .results
            .get(&hash)
            .is_some_and(|entry| now.duration_since(entry.cached_at) < self.config.cache_expiry);
        if fresh {
            QueryState::Cached
        } else if state.stats.contains_key(&hash) {
            QueryState::Tracked
        } else {
            QueryState::Unseen
        }
    }

    /// Stat record for one query shape.
    pub async fn query_stats(&self, sql: &str, params: &[Value]) -> Option<QueryStatRecord> {
        let hash = query_hash(&normalize_sql(sql), params);
        self.state.lock().await.stats.get(&hash).cloned()
    }

    pub async fn slow_queries(&self) -> Vec<SlowQueryRecord> {
        self.state.lock().await.slow.values().cloned().collect()
    }
}

impl std::fmt::Debug for QueryOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptimizer")
            .field("config", &self.config)
            .field("shared_cache", &self.shared_cache.is_some())
            .finish_non_exhaustive()
    }
}

/// Hex SHA-256 of the normalized statement and its serialized params.
pub fn query_hash(normalized_sql: &str, params: &[Value]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_sql.as_bytes());
    hasher.update([0u8]);
    hasher.update(Value::Array(params.to_vec()).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn shared_key(hash: &str) -> String {
    format!("{SHARED_KEY_PREFIX}{hash}")
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
