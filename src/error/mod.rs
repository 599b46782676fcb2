//! Error types for the cache client.

use thiserror::Error;

/// Error type for cache client operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The circuit breaker is open; the command was refused without
    /// touching the pool. Back off or call `reset_circuit_breaker`.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The underlying transport failed (refused, reset, protocol error).
    #[error("cache connection error: {0}")]
    Connection(#[from] redis::RedisError),

    /// The command exceeded the per-command timeout. Counted as a
    /// connection error for circuit breaker accounting.
    #[error("cache command timed out after {0}ms")]
    Timeout(u64),

    /// Invalid or missing configuration. Raised at construction, never retried.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for CacheError {
    fn from(e: config::ConfigError) -> Self {
        CacheError::Config(e.to_string())
    }
}

impl CacheError {
    /// Whether the caller can reasonably retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::CircuitOpen | CacheError::Connection(_) | CacheError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
