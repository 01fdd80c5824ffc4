//! Error types for the data-access context.

use datagate_core::ConfigError;
use datagate_pool::PoolError;
use thiserror::Error;

/// Result type alias for [`crate::DataLayer`] operations.
pub type DataLayerResult<T> = Result<T, DataLayerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataLayerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl DataLayerError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DataLayerError::Config(_) => false,
            DataLayerError::Pool(e) => e.is_transient(),
        }
    }
}
