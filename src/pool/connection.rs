//! A single pooled connection slot.
//!
//! Connections are created lazily: the slot holds a
//! [`MultiplexedConnection`] once established and reconnects on demand
//! after invalidation. Lifecycle transitions feed the shared circuit
//! breaker and event bus.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::RwLock;

use crate::circuit::CircuitBreaker;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus};

use super::backoff::{BackoffConfig, ReconnectBackoff};

/// One slot in the connection pool.
pub struct PooledConnection {
    /// Position in the pool, stable for the client's lifetime
    index: usize,
    /// Redis client handle for establishing transport connections
    client: Client,
    /// Live multiplexed connection, if any
    conn: RwLock<Option<MultiplexedConnection>>,
    /// Shared breaker fed by this slot's lifecycle events
    circuit: Arc<CircuitBreaker>,
    events: EventBus,
    /// Successful establishes over the slot's lifetime
    connects: AtomicU32,
}

impl PooledConnection {
    pub(crate) fn new(
        index: usize,
        client: Client,
        circuit: Arc<CircuitBreaker>,
        events: EventBus,
    ) -> Self {
        Self {
            index,
            client,
            conn: RwLock::new(None),
            circuit,
            events,
            connects: AtomicU32::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of successful connection establishes on this slot.
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::Acquire)
    }

    /// Get the live transport handle, establishing a connection if the
    /// slot is empty.
    pub async fn handle(&self) -> Result<MultiplexedConnection> {
        {
            let conn = self.conn.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.establish().await
    }

    /// Establish a new transport connection for this slot.
    async fn establish(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.conn.write().await;

        // Another task may have connected while we waited for the lock
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                self.connects.fetch_add(1, Ordering::AcqRel);
                self.circuit.mark_connected();
                self.events.emit(CacheEvent::Connect { index: self.index });
                tracing::info!(index = self.index, "cache connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit.record_failure();
                self.events.emit(CacheEvent::Error {
                    index: self.index,
                    message: e.to_string(),
                });
                tracing::error!(index = self.index, error = %e, "cache connection failed");
                Err(CacheError::Connection(e))
            }
        }
    }

    /// Ping the cache service over this slot's connection.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.handle().await?;
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    self.disconnect().await;
                }
                Err(CacheError::Connection(e))
            }
        }
    }

    /// Drop the live connection so the next use reconnects.
    pub async fn disconnect(&self) {
        let mut guard = self.conn.write().await;
        if guard.take().is_some() {
            self.circuit.mark_disconnected();
            self.events.emit(CacheEvent::Close { index: self.index });
            tracing::debug!(index = self.index, "cache connection closed");
        }
    }

    /// Force-disconnect and re-establish with exponential backoff.
    ///
    /// Used by the circuit reset sweep. Gives up after `max_retries`
    /// attempts, returning the last connection error.
    pub async fn reconnect(&self, backoff: BackoffConfig, max_retries: u32) -> Result<()> {
        self.disconnect().await;

        let mut backoff = ReconnectBackoff::new(backoff);
        loop {
            match self.establish().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if backoff.attempt() + 1 >= max_retries.max(1) {
                        tracing::warn!(
                            index = self.index,
                            attempts = max_retries.max(1),
                            "giving up on reconnect"
                        );
                        return Err(e);
                    }
                    let delay = backoff.next_delay();
                    tracing::debug!(
                        index = self.index,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "reconnect attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Whether the slot currently holds a live connection handle.
    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }
}
