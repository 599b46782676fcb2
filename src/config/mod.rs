use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;

use crate::error::{CacheError, Result};

/// Top-level cache client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Redis endpoint URL, e.g. `redis://localhost:6379`. Required.
    pub url: String,
    #[serde(default)]
    pub pool: PoolOptions,
}

/// Pool and resilience tuning, fixed at construction.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolOptions {
    /// Number of pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Base delay between reconnect attempts (ms)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Maximum reconnect attempts per connection during a reset sweep
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Health check timer interval (ms)
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Consecutive-ish error count that opens the circuit
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    /// Per-command timeout (ms)
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_pool_size() -> usize {
    5
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    10
}

fn default_health_check_interval_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_circuit_breaker_threshold() -> u32 {
    5
}

fn default_command_timeout_ms() -> u64 {
    1000
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
            health_check_interval_ms: default_health_check_interval_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl CacheSettings {
    /// Load settings from config files and environment variables.
    ///
    /// Sources, later ones winning: `config/default`, `config/{RUN_MODE}`,
    /// then `CACHE_*` environment variables (`CACHE_URL`,
    /// `CACHE_POOL__POOL_SIZE`, `CACHE_POOL__RETRY_DELAY_MS`, ...).
    pub fn new() -> Result<Self> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("CACHE")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: CacheSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Build settings for a known endpoint with default pool options.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: PoolOptions::default(),
        }
    }

    /// Validate the captured configuration. Called at client construction.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(CacheError::Config("cache endpoint URL is required".into()));
        }
        if self.pool.pool_size == 0 {
            return Err(CacheError::Config("pool_size must be at least 1".into()));
        }
        if self.pool.command_timeout_ms == 0 {
            return Err(CacheError::Config(
                "command_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
