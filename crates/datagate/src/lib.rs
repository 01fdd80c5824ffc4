//! datagate — data-access resilience layer.
//!
//! [`DataLayer`] owns one [`ConnectionPool`], one [`CacheManager`] and one
//! [`QueryOptimizer`] and wires them together: queries go through the
//! optimizer, whose executor is the pool. Nothing is global; create a
//! context, `initialize` it, and `shutdown` it when done.

pub mod context;
pub mod error;

pub use context::{DataLayer, DataLayerHealth};
pub use error::{DataLayerError, DataLayerResult};

pub use datagate_cache::{CacheConfig, CacheManager, ExternalCache, InMemoryExternalCache};
pub use datagate_core::{Credentials, DataGateConfig};
pub use datagate_pool::{
    ClientFuture, ConnectionFactory, ConnectionPool, DatabaseClient, PoolConfig, PoolError,
};
pub use datagate_query::{ExecuteOptions, OptimizerConfig, QueryAnalysis, QueryOptimizer};
