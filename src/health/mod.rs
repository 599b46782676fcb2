//! Background health monitoring and statistics rollup.
//!
//! Independent of caller traffic, the monitor pings every pooled
//! connection on a fixed interval, aggregates a health percentage, and
//! rolls buffered latency samples into percentile statistics. Failures
//! inside a pass are logged, never propagated: the timer always keeps
//! firing until shutdown.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::config::PoolOptions;
use crate::current_time_ms;
use crate::events::{CacheEvent, EventBus};
use crate::metrics::HealthMetrics;
use crate::pool::CachePool;
use crate::stats::{summarize, CacheStats, CacheStatsSnapshot, LatencyRecorder};

/// Health percentage below which the `unhealthy` event fires.
const DEGRADED_THRESHOLD_PCT: f64 = 50.0;

/// Point-in-time health check result, emitted with every tick.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Wall-clock timestamp (ms since epoch)
    pub timestamp_ms: i64,
    /// Connections that answered the ping
    pub healthy: usize,
    /// Pool size
    pub total: usize,
    /// `healthy / total * 100`
    pub percentage: f64,
    pub circuit: CircuitState,
    /// Successful connection establishes across the pool since startup
    pub reconnects: u32,
    pub stats: CacheStatsSnapshot,
}

/// Periodic liveness prober and stats aggregator.
pub struct HealthMonitor {
    pool: Arc<CachePool>,
    circuit: Arc<CircuitBreaker>,
    stats: Arc<CacheStats>,
    latency: Arc<LatencyRecorder>,
    events: EventBus,
    interval: Duration,
    ping_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl HealthMonitor {
    pub fn new(
        pool: Arc<CachePool>,
        circuit: Arc<CircuitBreaker>,
        stats: Arc<CacheStats>,
        latency: Arc<LatencyRecorder>,
        events: EventBus,
        options: &PoolOptions,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            pool,
            circuit,
            stats,
            latency,
            events,
            interval: Duration::from_millis(options.health_check_interval_ms),
            ping_timeout: Duration::from_millis(options.command_timeout_ms),
            shutdown,
        }
    }

    /// Run until the shutdown signal arrives.
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            pool_size = self.pool.size(),
            "health monitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("health monitor received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.check().await;
                }
            }
        }

        tracing::info!("health monitor stopped");
    }

    /// One health check pass. Ping failures count a connection as
    /// unhealthy rather than surfacing an error, so a pass never fails.
    async fn check(&self) -> HealthSnapshot {
        let pings = self.pool.connections().iter().map(|conn| {
            let conn = conn.clone();
            let ping_timeout = self.ping_timeout;
            async move {
                match timeout(ping_timeout, conn.ping()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::debug!(index = conn.index(), error = %e, "health ping failed");
                        false
                    }
                    Err(_) => {
                        tracing::debug!(index = conn.index(), "health ping timed out");
                        false
                    }
                }
            }
        });

        let results = join_all(pings).await;
        let healthy = results.iter().filter(|ok| **ok).count();
        let total = self.pool.size();
        let percentage = healthy as f64 / total as f64 * 100.0;

        HealthMetrics::set_health_percentage(percentage);
        HealthMetrics::set_circuit_state(self.circuit.state());

        if percentage < DEGRADED_THRESHOLD_PCT {
            tracing::warn!(
                healthy = healthy,
                total = total,
                percentage = percentage,
                "cache pool degraded"
            );
            self.events.emit(CacheEvent::Unhealthy { percentage });
        }

        // Roll up latency samples. An empty buffer skips the computation,
        // so stats retain the previous summary.
        let mut samples = self.latency.drain();
        if !samples.is_empty() {
            self.stats.set_latency(summarize(&mut samples));
        }

        let snapshot = HealthSnapshot {
            timestamp_ms: current_time_ms(),
            healthy,
            total,
            percentage,
            circuit: self.circuit.state(),
            reconnects: self.pool.total_connects(),
            stats: self.stats.snapshot(),
        };

        tracing::debug!(
            healthy = healthy,
            total = total,
            percentage = percentage,
            samples = samples.len(),
            "health check completed"
        );

        self.events.emit(CacheEvent::HealthCheck(snapshot.clone()));
        snapshot
    }
}
