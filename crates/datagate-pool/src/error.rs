//! Connection pool error types.

use std::time::Duration;

use datagate_core::ConfigError;
use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced by [`crate::ConnectionPool`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("connection pool is not initialized")]
    NotInitialized,

    #[error("connection pool is shut down")]
    ShutDown,

    #[error("timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    #[error("failed to create connection: {0}")]
    ConnectionCreate(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("query timed out after {0:?}")]
    QueryTimeout(Duration),

    #[error("pool task failed: {0}")]
    TaskFailed(String),
}

impl PoolError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PoolError::AcquireTimeout(_) | PoolError::ConnectionCreate(_) | PoolError::QueryTimeout(_)
        )
    }
}
