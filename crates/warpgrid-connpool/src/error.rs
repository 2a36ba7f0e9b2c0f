//! Error types for the connection pool manager.

use std::time::Duration;

use thiserror::Error;

use crate::pool::PoolId;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors surfaced to callers of the connection factory.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No pooled connection became available within the pool's wait bound.
    #[error("timed out after {timeout:?} waiting for a connection from {pool}")]
    Timeout { pool: PoolId, timeout: Duration },

    /// The provider failed to open a physical connection. The provider's
    /// error is kept intact as the source.
    #[error("failed to open connection: {0}")]
    ConnectionCreation(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The pool was shut down and no longer hands out connections.
    #[error("{0} is shut down")]
    PoolShutDown(PoolId),

    /// The owner's pool group kept getting pruned out from under the
    /// request; retrying did not reach a live group.
    #[error("pool group disabled while acquiring a connection")]
    GroupDisabled,

    #[error("metadata factory error: {0}")]
    MetaData(#[source] anyhow::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PoolError {
    /// Whether this error is an acquisition timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout { .. })
    }
}
