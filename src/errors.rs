//! Error types for the resilience core

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Resource factory failed: {0}")]
    ResourceFactory(String),

    #[error("Pool is closed - recovery in progress")]
    PoolClosed,

    #[error("Circuit breaker is open - too many failures")]
    CircuitOpen,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Shutting down - new work is rejected")]
    ShuttingDown,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl PoolError {
    /// Build a factory error from anything printable
    pub fn factory(message: impl std::fmt::Display) -> Self {
        PoolError::ResourceFactory(message.to_string())
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Used as the default predicate for [`with_retry`](crate::with_retry).
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::ResourceFactory(_) | PoolError::Timeout(_))
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
