//! Error types for the resource pool

use std::sync::Arc;

use thiserror::Error;

/// Shared, cloneable error produced by a [`Factory`](crate::Factory)
pub type FactoryError = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool is draining and cannot accept work")]
    Draining,

    #[error("Failed to create resource: {0}")]
    CreateFailed(FactoryError),

    #[error("Pool dropped the request before a resource was dispensed")]
    Cancelled,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Metrics export failed: {0}")]
    MetricsExport(String),
}

impl PoolError {
    pub(crate) fn create_failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PoolError::CreateFailed(Arc::new(err))
    }

    /// Whether this error came from the factory's `create` operation
    pub fn is_create_failure(&self) -> bool {
        matches!(self, PoolError::CreateFailed(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
