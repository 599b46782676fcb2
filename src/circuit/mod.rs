//! Circuit breaker gating all cache operations.
//!
//! A single breaker per client instance aggregates connection failures from
//! every pool slot. Commands are refused while the circuit is open; after
//! `retry_delay * 2` the breaker moves to `Connecting` and operations are
//! tentatively re-permitted.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::current_time_ms;
use crate::events::{CacheEvent, EventBus};

/// Aggregate connection state of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitState {
    /// At least some connections are usable, operations permitted
    Connected = 0,
    /// No confirmed connection yet
    Disconnected = 1,
    /// Mid-reset, operations tentatively re-permitted
    Connecting = 2,
    /// Operations refused
    CircuitOpen = 3,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Connected,
            2 => CircuitState::Connecting,
            3 => CircuitState::CircuitOpen,
            _ => CircuitState::Disconnected,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Connected => "connected",
            CircuitState::Disconnected => "disconnected",
            CircuitState::Connecting => "connecting",
            CircuitState::CircuitOpen => "circuit_open",
        }
    }
}

/// Circuit breaker driven by a rolling error counter.
///
/// Every connection error increments the counter; every successful command
/// decrements it by one (floored at zero), so isolated transient errors
/// self-heal without a manual reset.
pub struct CircuitBreaker {
    /// Current state (see `CircuitState` discriminants)
    state: AtomicU8,
    /// Rolling error counter
    error_count: AtomicU32,
    /// Error count at which the circuit opens
    threshold: u32,
    /// Delay before an open circuit re-permits operations (`retry_delay * 2`)
    reopen_after: Duration,
    /// Monotonic base for open-duration arithmetic
    started: Instant,
    /// Milliseconds since `started` at which the circuit last opened
    opened_at_ms: AtomicU64,
    /// Wall-clock timestamp of the last state change (ms since epoch)
    last_state_change: AtomicI64,
    events: EventBus,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, retry_delay: Duration, events: EventBus) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Disconnected as u8),
            error_count: AtomicU32::new(0),
            threshold,
            reopen_after: retry_delay * 2,
            started: Instant::now(),
            opened_at_ms: AtomicU64::new(0),
            last_state_change: AtomicI64::new(current_time_ms()),
            events,
        }
    }

    /// Get the current state, applying the open → connecting transition if
    /// the reopen delay has elapsed.
    pub fn state(&self) -> CircuitState {
        self.check_reopen();
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Whether operations may be attempted right now.
    pub fn allow_request(&self) -> bool {
        self.state() != CircuitState::CircuitOpen
    }

    /// Current value of the rolling error counter.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Acquire)
    }

    /// Record a successful command: decrement the error counter by one
    /// (floored at zero) and confirm the connection as usable.
    pub fn record_success(&self) {
        let _ = self
            .error_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.mark_connected();
    }

    /// Record a connection error. Opens the circuit once the counter
    /// reaches the configured threshold.
    pub fn record_failure(&self) {
        let count = self.error_count.fetch_add(1, Ordering::AcqRel) + 1;

        if count >= self.threshold {
            let prev = self
                .state
                .swap(CircuitState::CircuitOpen as u8, Ordering::AcqRel);
            if prev != CircuitState::CircuitOpen as u8 {
                self.opened_at_ms
                    .store(self.elapsed_ms(), Ordering::Release);
                self.touch();
                tracing::warn!(
                    errors = count,
                    threshold = self.threshold,
                    "circuit breaker opened"
                );
                self.events.emit(CacheEvent::CircuitOpen);
            }
        }
    }

    /// Reset the breaker: zero the error counter and re-permit operations.
    ///
    /// Valid from any prior state. The caller is responsible for kicking off
    /// connection reconnects; the breaker only manages the gate.
    pub fn reset(&self) {
        self.error_count.store(0, Ordering::Release);
        self.state
            .store(CircuitState::Connecting as u8, Ordering::Release);
        self.touch();
        tracing::info!("circuit breaker reset");
        self.events.emit(CacheEvent::CircuitReset);
    }

    /// Note that a pooled connection was established.
    pub fn mark_connected(&self) {
        // Never leave CircuitOpen through this path; only reset does.
        for from in [CircuitState::Disconnected, CircuitState::Connecting] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    CircuitState::Connected as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.touch();
                tracing::debug!("circuit breaker confirmed connected");
                break;
            }
        }
    }

    /// Note that a pooled connection was closed.
    pub fn mark_disconnected(&self) {
        if self
            .state
            .compare_exchange(
                CircuitState::Connected as u8,
                CircuitState::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.touch();
        }
    }

    /// Transition an open circuit to `Connecting` once the reopen delay
    /// has elapsed. The error counter is retained: only an explicit reset
    /// zeroes it, so a failure while probing re-opens immediately.
    fn check_reopen(&self) {
        if self.state.load(Ordering::Acquire) != CircuitState::CircuitOpen as u8 {
            return;
        }

        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        let elapsed = self.elapsed_ms().saturating_sub(opened_at);

        if elapsed >= self.reopen_after.as_millis() as u64
            && self
                .state
                .compare_exchange(
                    CircuitState::CircuitOpen as u8,
                    CircuitState::Connecting as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            self.touch();
            tracing::info!(
                open_ms = elapsed,
                "circuit breaker re-permitting operations"
            );
            self.events.emit(CacheEvent::CircuitReset);
        }
    }

    fn elapsed_ms(&self) -> u64 {
        Instant::now().duration_since(self.started).as_millis() as u64
    }

    fn touch(&self) {
        self.last_state_change
            .store(current_time_ms(), Ordering::Release);
    }

    /// Get a statistics snapshot.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state(),
            error_count: self.error_count(),
            last_state_change_ms: self.last_state_change.load(Ordering::Acquire),
        }
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub error_count: u32,
    pub last_state_change_ms: i64,
}
