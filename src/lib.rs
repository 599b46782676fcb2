//! Resilient pooled Redis cache client.
//!
//! Wraps a fixed pool of connections with a circuit breaker, periodic
//! health checks, and latency percentile tracking. See
//! [`client::CacheClient`] for the public API.

pub mod circuit;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod stats;

pub use circuit::{CircuitBreakerSnapshot, CircuitState};
pub use client::{CacheBatch, CacheClient};
pub use config::{CacheSettings, PoolOptions};
pub use error::{CacheError, Result};
pub use events::CacheEvent;
pub use health::HealthSnapshot;
pub use stats::{CacheStatsSnapshot, LatencySummary};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
