//! Operation counters and latency percentile tracking.
//!
//! Latency samples accumulate in a bounded rolling buffer and are rolled
//! up into avg/p95/p99 on each health check tick. Counters are monotonic
//! and reset only by an explicit flush.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

/// Maximum retained latency samples between health ticks.
pub const LATENCY_BUFFER_CAP: usize = 1000;

/// Rolled-up latency summary in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencySummary {
    pub avg: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Bounded rolling buffer of per-operation durations.
pub struct LatencyRecorder {
    samples: Mutex<Vec<f64>>,
    capacity: usize,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self::with_capacity(LATENCY_BUFFER_CAP)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Record one operation duration. Evicts the oldest samples when the
    /// buffer exceeds its capacity.
    pub fn record(&self, millis: f64) {
        let mut samples = self.lock();
        samples.push(millis);
        if samples.len() > self.capacity {
            let excess = samples.len() - self.capacity;
            samples.drain(..excess);
        }
    }

    /// Take all buffered samples, leaving the buffer empty.
    pub fn drain(&self) -> Vec<f64> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<f64>> {
        self.samples.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute avg/p95/p99 over a batch of samples.
///
/// Percentiles use the nearest-rank method: sort ascending and take the
/// value at `ceil(q * n) - 1`.
pub fn summarize(samples: &mut [f64]) -> LatencySummary {
    if samples.is_empty() {
        return LatencySummary::default();
    }

    samples.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = samples.len();
    let avg = samples.iter().sum::<f64>() / n as f64;
    let rank = |q: f64| ((n as f64 * q).ceil() as usize).saturating_sub(1).min(n - 1);

    LatencySummary {
        avg,
        p95: samples[rank(0.95)],
        p99: samples[rank(0.99)],
    }
}

/// Process-wide cache operation counters.
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    operations: AtomicU64,
    latency: Mutex<LatencySummary>,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            latency: Mutex::new(LatencySummary::default()),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one attempted command. Not called for short-circuited calls.
    pub fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Overwrite the latency summary. Single writer: the health monitor.
    pub fn set_latency(&self, summary: LatencySummary) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = summary;
    }

    pub fn latency(&self) -> LatencySummary {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reset all counters and the latency summary.
    pub fn flush(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.operations.store(0, Ordering::Relaxed);
        self.set_latency(LatencySummary::default());
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
            latency_ms: self.latency(),
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub operations: u64,
    pub latency_ms: LatencySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_caps_buffer() {
        let recorder = LatencyRecorder::with_capacity(10);
        for i in 0..25 {
            recorder.record(i as f64);
        }
        assert_eq!(recorder.len(), 10);

        // Oldest entries were evicted first
        let drained = recorder.drain();
        assert_eq!(drained[0], 15.0);
        assert_eq!(drained[9], 24.0);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_recorder_default_cap_is_1000() {
        let recorder = LatencyRecorder::new();
        for i in 0..1500 {
            recorder.record(i as f64);
        }
        assert_eq!(recorder.len(), 1000);
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&mut []);
        assert_eq!(summary.avg, 0.0);
        assert_eq!(summary.p95, 0.0);
    }

    #[test]
    fn test_summarize_hundred_samples() {
        // 10, 20, ..., 1000
        let mut samples: Vec<f64> = (1..=100).map(|i| (i * 10) as f64).collect();
        let summary = summarize(&mut samples);

        assert_eq!(summary.avg, 505.0);
        // Nearest-rank: p95 is the value at index 94 of the sorted array
        assert_eq!(summary.p95, 950.0);
        assert_eq!(summary.p99, 990.0);
    }

    #[test]
    fn test_summarize_single_sample() {
        let mut samples = vec![42.0];
        let summary = summarize(&mut samples);
        assert_eq!(summary.avg, 42.0);
        assert_eq!(summary.p95, 42.0);
        assert_eq!(summary.p99, 42.0);
    }

    #[test]
    fn test_summarize_sorts_unordered_input() {
        let mut samples = vec![30.0, 10.0, 20.0];
        let summary = summarize(&mut samples);
        assert_eq!(summary.avg, 20.0);
        assert_eq!(summary.p95, 30.0);
    }

    #[test]
    fn test_stats_counters_and_flush() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_operation();
        stats.record_operation();
        stats.record_operation();

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.operations, 3);

        stats.flush();
        let snap = stats.snapshot();
        assert_eq!(snap.hits, 0);
        assert_eq!(snap.misses, 0);
        assert_eq!(snap.operations, 0);
        assert_eq!(snap.latency_ms.avg, 0.0);
    }

    #[test]
    fn test_latency_summary_retained_until_overwritten() {
        let stats = CacheStats::new();
        stats.set_latency(LatencySummary {
            avg: 5.0,
            p95: 9.0,
            p99: 10.0,
        });
        // An empty health tick skips the computation; previous values stay
        assert_eq!(stats.latency().p95, 9.0);
    }
}
