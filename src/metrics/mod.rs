//! Prometheus metrics for the cache client.
//!
//! Exposes counters for hits/misses/operations, a command latency
//! histogram, and gauges for circuit state and pool health. The host
//! application scrapes these through [`encode_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Encoder, Gauge,
    Histogram, IntCounter, IntGauge, TextEncoder,
};

use crate::circuit::CircuitState;

/// Prefix for all metrics
const METRIC_PREFIX: &str = "bloom_cache";

lazy_static! {
    /// Cache reads that returned a value
    pub static ref HITS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_hits_total", METRIC_PREFIX),
        "Cache reads that returned a value"
    ).unwrap();

    /// Cache reads that returned nothing
    pub static ref MISSES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_misses_total", METRIC_PREFIX),
        "Cache reads that returned no value"
    ).unwrap();

    /// Attempted cache commands (successful or failed)
    pub static ref OPERATIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_operations_total", METRIC_PREFIX),
        "Attempted cache commands"
    ).unwrap();

    /// Connection-level errors, including command timeouts
    pub static ref CONNECTION_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connection_errors_total", METRIC_PREFIX),
        "Connection errors observed by the cache client"
    ).unwrap();

    /// Command latency distribution in seconds
    pub static ref COMMAND_LATENCY_SECONDS: Histogram = register_histogram!(
        format!("{}_command_latency_seconds", METRIC_PREFIX),
        "Cache command latency in seconds",
        vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    ).unwrap();

    /// Circuit breaker state (see CircuitState discriminants)
    pub static ref CIRCUIT_STATE: IntGauge = register_int_gauge!(
        format!("{}_circuit_state", METRIC_PREFIX),
        "Circuit breaker state (0=connected, 1=disconnected, 2=connecting, 3=open)"
    ).unwrap();

    /// Percentage of pooled connections that answered the last ping
    pub static ref HEALTH_PERCENTAGE: Gauge = register_gauge!(
        format!("{}_health_percentage", METRIC_PREFIX),
        "Percentage of healthy pooled connections"
    ).unwrap();
}

/// Helpers for command-path metrics.
pub struct CommandMetrics;

impl CommandMetrics {
    pub fn record_hit() {
        HITS_TOTAL.inc();
    }

    pub fn record_miss() {
        MISSES_TOTAL.inc();
    }

    pub fn record_operation() {
        OPERATIONS_TOTAL.inc();
    }

    pub fn record_connection_error() {
        CONNECTION_ERRORS_TOTAL.inc();
    }

    pub fn record_latency_ms(millis: f64) {
        COMMAND_LATENCY_SECONDS.observe(millis / 1000.0);
    }
}

/// Helpers for health-path metrics.
pub struct HealthMetrics;

impl HealthMetrics {
    pub fn set_circuit_state(state: CircuitState) {
        CIRCUIT_STATE.set(state as u8 as i64);
    }

    pub fn set_health_percentage(percentage: f64) {
        HEALTH_PERCENTAGE.set(percentage);
    }
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
