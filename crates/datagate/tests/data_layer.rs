//! End-to-end tests for the data-access context.
//!
//! The test stack: `DataLayer` → `QueryOptimizer` → `ConnectionPool` →
//! `RecordingFactory` → `RecordingClient`, with an optional shared
//! `InMemoryExternalCache` between layers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use datagate::{
    ClientFuture, ConnectionFactory, Credentials, DataGateConfig, DataLayer, DataLayerError,
    DatabaseClient, ExecuteOptions, InMemoryExternalCache, PoolError,
};
use serde_json::{Value, json};

// ── Recording backend ───────────────────────────────────────────────

/// Shared counters for every client a factory hands out.
#[derive(Debug, Default)]
struct Backend {
    executes: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    connects: AtomicU64,
}

#[derive(Debug)]
struct RecordingClient {
    backend: Arc<Backend>,
}

impl DatabaseClient for RecordingClient {
    fn execute<'a>(&'a mut self, sql: &'a str, params: &'a [Value]) -> ClientFuture<'a, Value> {
        Box::pin(async move {
            let backend = &self.backend;
            backend.executes.fetch_add(1, Ordering::SeqCst);
            let now = backend.active.fetch_add(1, Ordering::SeqCst) + 1;
            backend.peak_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            backend.active.fetch_sub(1, Ordering::SeqCst);
            if sql.contains("missing_table") {
                return Err("relation \"missing_table\" does not exist".to_string());
            }
            Ok(json!({ "rows": [{ "sql": sql, "params": params }] }))
        })
    }

    fn close(&mut self) {}
}

struct RecordingFactory {
    backend: Arc<Backend>,
}

impl RecordingFactory {
    fn new() -> (Arc<Self>, Arc<Backend>) {
        let backend = Arc::new(Backend::default());
        (
            Arc::new(Self {
                backend: backend.clone(),
            }),
            backend,
        )
    }
}

impl ConnectionFactory for RecordingFactory {
    fn connect<'a>(&'a self, _credentials: &'a Credentials) -> ClientFuture<'a, Box<dyn DatabaseClient>> {
        Box::pin(async move {
            self.backend.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingClient {
                backend: self.backend.clone(),
            }) as Box<dyn DatabaseClient>)
        })
    }
}

fn credentials() -> Credentials {
    Credentials::new("postgres://db.datagate.local/app", "integration-key")
}

fn config(toml: &str) -> DataGateConfig {
    DataGateConfig::from_toml_str(toml).expect("valid test config")
}

async fn make_layer(toml: &str) -> (DataLayer, Arc<Backend>) {
    let (factory, backend) = RecordingFactory::new();
    let layer = DataLayer::new(&config(toml), factory).expect("valid layer config");
    layer.initialize(credentials()).await.expect("initialize");
    (layer, backend)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_select_hits_the_database_once() {
    let (layer, backend) = make_layer("[pool]\nmin = 1\nmax = 4\n").await;
    let sql = "SELECT id FROM users WHERE id = 1";

    let first = layer.query(sql, vec![]).await.unwrap();
    let second = layer.query(sql, vec![]).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.executes.load(Ordering::SeqCst), 1);

    let health = layer.health().await;
    assert!(health.healthy);
    assert_eq!(health.pool.total_queries, 1);
    assert_eq!(health.queries.total_cache_hits, 1);
    assert_eq!(health.pool.in_use_connections, 0);

    layer.shutdown().await;
}

#[tokio::test]
async fn writes_always_reach_the_database() {
    let (layer, backend) = make_layer("").await;
    for _ in 0..3 {
        layer
            .query("UPDATE users SET active = true WHERE id = $1", vec![json!(9)])
            .await
            .unwrap();
    }
    assert_eq!(backend.executes.load(Ordering::SeqCst), 3);
    layer.shutdown().await;
}

#[tokio::test]
async fn skip_cache_bypasses_the_result_cache() {
    let (layer, backend) = make_layer("").await;
    let sql = "SELECT id FROM users WHERE id = 2";
    let options = ExecuteOptions { skip_cache: true };
    layer.query_with(sql, vec![], options).await.unwrap();
    layer.query_with(sql, vec![], options).await.unwrap();
    assert_eq!(backend.executes.load(Ordering::SeqCst), 2);
    layer.shutdown().await;
}

#[tokio::test]
async fn database_errors_surface_as_pool_query_errors() {
    let (layer, _) = make_layer("").await;
    let err = layer
        .query("SELECT id FROM missing_table WHERE id = 1", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DataLayerError::Pool(PoolError::Query(_))));
    assert!(!err.is_transient());

    let health = layer.health().await;
    assert_eq!(health.pool.failed_queries, 1);
    assert_eq!(health.pool.in_use_connections, 0);
    layer.shutdown().await;
}

#[tokio::test]
async fn concurrent_queries_respect_the_pool_bound() {
    let (layer, backend) = make_layer("[pool]\nmin = 0\nmax = 3\n").await;
    let layer = Arc::new(layer);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let layer = layer.clone();
        tasks.push(tokio::spawn(async move {
            layer
                .query_with(
                    "SELECT id FROM users WHERE id = $1",
                    vec![json!(i)],
                    ExecuteOptions::default(),
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(backend.peak_active.load(Ordering::SeqCst) <= 3);
    assert!(backend.connects.load(Ordering::SeqCst) <= 3);
    let health = layer.pool().health_status().await;
    assert!(health.total_connections <= 3);
    assert_eq!(health.in_use_connections, 0);
    layer.shutdown().await;
}

#[tokio::test]
async fn missing_credentials_fail_initialize() {
    let (factory, backend) = RecordingFactory::new();
    let layer = DataLayer::new(&DataGateConfig::default(), factory).unwrap();
    let err = layer
        .initialize(Credentials::new("postgres://db/app", " "))
        .await
        .unwrap_err();
    assert!(matches!(err, DataLayerError::Pool(PoolError::Configuration(_))));
    assert_eq!(backend.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn invalid_pool_bounds_are_rejected_up_front() {
    let (factory, _) = RecordingFactory::new();
    let err = DataLayer::new(&config("[pool]\nmin = 5\nmax = 2\n"), factory).unwrap_err();
    assert!(matches!(err, DataLayerError::Config(_)));
}

#[tokio::test]
async fn shutdown_is_idempotent_and_stops_queries() {
    let (layer, backend) = make_layer("").await;
    let cached = "SELECT id FROM users WHERE id = 3";
    layer.query(cached, vec![]).await.unwrap();
    assert_eq!(layer.optimizer().performance_report().await.cached_results, 1);

    layer.shutdown().await;
    layer.shutdown().await;

    for sql in [cached, "SELECT id FROM users WHERE id = 4"] {
        let err = layer.query(sql, vec![]).await.unwrap_err();
        assert_eq!(err, DataLayerError::Pool(PoolError::ShutDown));
    }
    assert_eq!(backend.executes.load(Ordering::SeqCst), 1);
    assert_eq!(layer.optimizer().performance_report().await.cached_results, 0);
    assert!(!layer.health().await.healthy);
}

#[tokio::test]
async fn shared_external_tier_serves_results_across_layers() {
    let external = Arc::new(InMemoryExternalCache::new());

    let (factory_a, backend_a) = RecordingFactory::new();
    let layer_a = DataLayer::new(&DataGateConfig::default(), factory_a)
        .unwrap()
        .with_external_cache(external.clone())
        .with_shared_query_cache();
    layer_a.initialize(credentials()).await.unwrap();

    let (factory_b, backend_b) = RecordingFactory::new();
    let layer_b = DataLayer::new(&DataGateConfig::default(), factory_b)
        .unwrap()
        .with_shared_query_cache()
        .with_external_cache(external.clone());
    layer_b.initialize(credentials()).await.unwrap();

    let sql = "SELECT name FROM products WHERE id = 42";
    let from_a = layer_a.query(sql, vec![]).await.unwrap();
    assert!(!external.is_empty().await);

    let from_b = layer_b.query(sql, vec![]).await.unwrap();
    assert_eq!(from_a, from_b);
    assert_eq!(backend_a.executes.load(Ordering::SeqCst), 1);
    assert_eq!(backend_b.executes.load(Ordering::SeqCst), 0);

    let health = layer_b.health().await;
    assert_eq!(health.cache.external_ok, Some(true));

    layer_a.shutdown().await;
    layer_b.shutdown().await;
}
