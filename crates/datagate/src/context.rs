//! DataLayer — the context that owns pool, cache and optimizer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use datagate_cache::{CacheConfig, CacheHealth, CacheManager, CacheStats, ExternalCache};
use datagate_core::{Credentials, DataGateConfig};
use datagate_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolError, PoolHealth};
use datagate_query::{ExecuteOptions, OptimizerConfig, PerformanceReport, QueryOptimizer};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::DataLayerResult;

/// Aggregate health of every component.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DataLayerHealth {
    pub healthy: bool,
    pub pool: PoolHealth,
    pub cache: CacheHealth,
    pub cache_stats: CacheStats,
    pub queries: PerformanceReport,
}

/// Connection pool, tiered cache and query optimizer behind one handle.
pub struct DataLayer {
    pool: ConnectionPool,
    cache: Arc<CacheManager>,
    optimizer: QueryOptimizer,
    share_results: bool,
    shut_down: AtomicBool,
}

impl DataLayer {
    /// Build every component from `config`. Nothing connects until [`DataLayer::initialize`].
    pub fn new(config: &DataGateConfig, factory: Arc<dyn ConnectionFactory>) -> DataLayerResult<Self> {
        let pool_config = PoolConfig::from_settings(&config.pool);
        pool_config.validate()?;

        Ok(Self {
            pool: ConnectionPool::new(pool_config, factory),
            cache: Arc::new(CacheManager::new(CacheConfig::from_settings(&config.cache))),
            optimizer: QueryOptimizer::new(OptimizerConfig::from_settings(&config.optimizer)),
            share_results: false,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Put an external tier in front of the local cache.
    pub fn with_external_cache(mut self, external: Arc<dyn ExternalCache>) -> Self {
        let config = self.cache.config().clone();
        self.cache = Arc::new(CacheManager::new(config).with_external(external));
        self.rebuild_optimizer()
    }

    /// Mirror cacheable query results into the [`CacheManager`] so other
    /// processes sharing the external tier can serve them.
    pub fn with_shared_query_cache(mut self) -> Self {
        self.share_results = true;
        self.rebuild_optimizer()
    }

    fn rebuild_optimizer(mut self) -> Self {
        let mut optimizer = QueryOptimizer::new(self.optimizer.config().clone());
        if self.share_results {
            optimizer = optimizer.with_shared_cache(self.cache.clone());
        }
        self.optimizer = optimizer;
        self
    }

    /// Initialize the pool and start the cache sweep.
    pub async fn initialize(&self, credentials: Credentials) -> DataLayerResult<()> {
        self.pool.initialize(credentials).await?;
        self.cache.start_cleanup_task().await;
        info!(
            shared_results = self.share_results,
            external_cache = self.cache.external_enabled(),
            "data layer initialized"
        );
        Ok(())
    }

    pub async fn query(&self, sql: &str, params: Vec<Value>) -> DataLayerResult<Value> {
        self.query_with(sql, params, ExecuteOptions::default()).await
    }

    /// Run `sql` through the optimizer with the pool as executor.
    ///
    /// After [`DataLayer::shutdown`] every call fails with
    /// [`PoolError::ShutDown`], cached results included.
    pub async fn query_with(&self, sql: &str, params: Vec<Value>, options: ExecuteOptions) -> DataLayerResult<Value> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown.into());
        }
        let pool = self.pool.clone();
        let result = self
            .optimizer
            .execute_optimized_query(
                move |sql, params| async move { pool.query(sql, params).await },
                sql,
                params,
                options,
            )
            .await?;
        Ok(result)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn optimizer(&self) -> &QueryOptimizer {
        &self.optimizer
    }

    pub async fn health(&self) -> DataLayerHealth {
        let pool = self.pool.health_status().await;
        let cache = self.cache.health_check().await;
        DataLayerHealth {
            healthy: pool.healthy && cache.healthy,
            pool,
            cache,
            cache_stats: self.cache.stats().await,
            queries: self.optimizer.performance_report().await,
        }
    }

    /// Shut down the pool and the cache and drop cached query results.
    /// Later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pool.shutdown().await;
        self.optimizer.clear_cache().await;
        self.cache.shutdown().await;
        info!("data layer shut down");
    }
}

impl std::fmt::Debug for DataLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLayer")
            .field("pool", &self.pool)
            .field("cache", &self.cache)
            .field("optimizer", &self.optimizer)
            .finish_non_exhaustive()
    }
}
