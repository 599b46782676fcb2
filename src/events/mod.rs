//! Typed lifecycle events emitted by the cache client.
//!
//! External collaborators (monitoring dashboard, security monitor) subscribe
//! via [`CacheClient::subscribe`](crate::client::CacheClient::subscribe) and
//! receive a broadcast stream of [`CacheEvent`] values. Emission never blocks
//! and is lossy for slow subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::health::HealthSnapshot;

/// Events observable by external collaborators.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    /// A pooled connection was established
    Connect { index: usize },
    /// A connection or command error occurred on the given pool slot
    Error { index: usize, message: String },
    /// A pooled connection was closed or invalidated
    Close { index: usize },
    /// The circuit breaker opened; commands will be refused
    CircuitOpen,
    /// The circuit breaker was reset (manually or by the reopen timer)
    CircuitReset,
    /// Fewer than half the pooled connections answered the last ping
    Unhealthy { percentage: f64 },
    /// Periodic health check snapshot
    HealthCheck(HealthSnapshot),
    /// The client was shut down
    Shutdown,
}

/// Broadcast fan-out for cache events.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers. A send error only means there are
    /// no subscribers, which is not a failure.
    pub fn emit(&self, event: CacheEvent) {
        tracing::trace!(?event, "cache event");
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_delivery() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(CacheEvent::Connect { index: 2 });

        let event = tokio_test::block_on(rx.recv()).unwrap();
        assert!(matches!(event, CacheEvent::Connect { index: 2 }));
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::default();
        // Must not panic or error
        bus.emit(CacheEvent::CircuitOpen);
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_event_serialization() {
        let event = CacheEvent::Unhealthy { percentage: 40.0 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "unhealthy");
        assert_eq!(json["percentage"], 40.0);
    }
}
