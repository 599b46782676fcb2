//! Fixed-size connection pool with round-robin checkout.

mod backoff;
mod connection;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use connection::PooledConnection;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use redis::Client;

use crate::circuit::CircuitBreaker;
use crate::events::EventBus;

/// Pool of N independent connections to the cache service.
///
/// Membership is fixed at construction; connections are reconnected in
/// place, never added or removed. Checkout is a stateless round-robin
/// cursor advance and never blocks or queues. The pool itself is
/// unconditional: circuit breaker gating happens in the command executor,
/// before checkout is ever invoked.
pub struct CachePool {
    connections: Vec<Arc<PooledConnection>>,
    cursor: AtomicUsize,
}

impl CachePool {
    pub fn new(
        client: Client,
        size: usize,
        circuit: Arc<CircuitBreaker>,
        events: EventBus,
    ) -> Self {
        let connections = (0..size)
            .map(|index| {
                Arc::new(PooledConnection::new(
                    index,
                    client.clone(),
                    circuit.clone(),
                    events.clone(),
                ))
            })
            .collect();

        Self {
            connections,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Checkout the connection at the current cursor and advance it.
    pub fn checkout(&self) -> Arc<PooledConnection> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[index].clone()
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn connections(&self) -> &[Arc<PooledConnection>] {
        &self.connections
    }

    /// Total successful establishes across all slots.
    pub fn total_connects(&self) -> u32 {
        self.connections.iter().map(|c| c.connects()).sum()
    }

    /// Close every pooled connection.
    pub async fn disconnect_all(&self) {
        for conn in &self.connections {
            conn.disconnect().await;
        }
    }
}
