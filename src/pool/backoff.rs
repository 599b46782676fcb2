//! Exponential backoff for connection reconnect sweeps.

use std::time::Duration;

use rand::Rng;

/// Backoff tuning for reconnect attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay in milliseconds
    pub initial_delay_ms: u64,
    /// Ceiling for the delay in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor applied after each attempt
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl BackoffConfig {
    /// Derive a backoff schedule from the configured retry delay.
    pub fn from_retry_delay(retry_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms: retry_delay_ms.max(1),
            max_delay_ms: retry_delay_ms.saturating_mul(8).max(30_000),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::from_retry_delay(5000)
    }
}

/// Exponential backoff calculator with jitter.
pub struct ReconnectBackoff {
    config: BackoffConfig,
    next_delay_ms: u64,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let initial = config.initial_delay_ms;
        Self {
            config,
            next_delay_ms: initial,
            attempt: 0,
        }
    }

    /// Get the delay to wait before the next attempt. Grows geometrically
    /// up to `max_delay_ms`, with jitter applied on top.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;

        let base = self.next_delay_ms as f64;
        let jittered = if self.config.jitter_factor > 0.0 && base > 0.0 {
            let jitter_range = base * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (base + jitter).max(1.0)
        } else {
            base.max(1.0)
        };

        self.next_delay_ms = ((base * self.config.multiplier) as u64).min(self.config.max_delay_ms);

        Duration::from_millis(jittered as u64)
    }

    /// Reset the schedule to the initial delay.
    pub fn reset(&mut self) {
        self.next_delay_ms = self.config.initial_delay_ms;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
