//! The public cache client.
//!
//! [`CacheClient`] is the single choke point for every cache operation:
//! circuit breaker gating, round-robin connection checkout, per-command
//! timeout, latency recording, and error accounting all happen in
//! [`CacheClient::execute`], and every public method delegates through it.
//!
//! The host application constructs one long-lived client, passes clones
//! (cheap, `Arc`-backed) wherever they are needed, and calls
//! [`CacheClient::shutdown`] at process exit.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, FromRedisValue, RedisResult, ToRedisArgs};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use crate::circuit::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
use crate::config::CacheSettings;
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventBus};
use crate::health::HealthMonitor;
use crate::metrics::CommandMetrics;
use crate::pool::{BackoffConfig, CachePool};
use crate::stats::{CacheStats, CacheStatsSnapshot, LatencyRecorder};

/// Resilient pooled cache client.
///
/// Cloning is cheap and all clones share the same pool, circuit breaker,
/// and statistics.
#[derive(Clone)]
pub struct CacheClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    settings: CacheSettings,
    pool: Arc<CachePool>,
    circuit: Arc<CircuitBreaker>,
    stats: Arc<CacheStats>,
    latency: Arc<LatencyRecorder>,
    events: EventBus,
    shutdown_tx: broadcast::Sender<()>,
    monitor: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl CacheClient {
    /// Build the client and start its health monitor.
    ///
    /// Connections are established lazily on first use, so this succeeds
    /// even when the cache service is momentarily unreachable. Must be
    /// called within a Tokio runtime.
    pub fn connect(settings: CacheSettings) -> Result<Self> {
        settings.validate()?;

        let client = Client::open(settings.url.as_str())
            .map_err(|e| CacheError::Config(format!("invalid cache URL: {}", e)))?;

        let events = EventBus::default();
        let circuit = Arc::new(CircuitBreaker::new(
            settings.pool.circuit_breaker_threshold,
            Duration::from_millis(settings.pool.retry_delay_ms),
            events.clone(),
        ));
        let pool = Arc::new(CachePool::new(
            client,
            settings.pool.pool_size,
            circuit.clone(),
            events.clone(),
        ));
        let stats = Arc::new(CacheStats::new());
        let latency = Arc::new(LatencyRecorder::new());

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let monitor = HealthMonitor::new(
            pool.clone(),
            circuit.clone(),
            stats.clone(),
            latency.clone(),
            events.clone(),
            &settings.pool,
            shutdown_rx,
        );
        let monitor_handle = tokio::spawn(monitor.run());

        tracing::info!(
            pool_size = settings.pool.pool_size,
            threshold = settings.pool.circuit_breaker_threshold,
            "cache client initialized"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                settings,
                pool,
                circuit,
                stats,
                latency,
                events,
                shutdown_tx,
                monitor: Mutex::new(Some(monitor_handle)),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Subscribe to lifecycle events (see [`CacheEvent`]).
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Current aggregate circuit state.
    pub fn circuit_state(&self) -> CircuitState {
        self.inner.circuit.state()
    }

    /// Circuit breaker detail for dashboards.
    pub fn circuit_snapshot(&self) -> CircuitBreakerSnapshot {
        self.inner.circuit.snapshot()
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Execute one cache command through the resilience pipeline.
    ///
    /// Fails fast with [`CacheError::CircuitOpen`] before any checkout if
    /// the circuit is open. Otherwise: count the operation, start timing,
    /// checkout a connection, run the command under the per-command
    /// timeout, record latency on success, and account errors against the
    /// circuit breaker before rethrowing them unchanged.
    async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        if !self.inner.circuit.allow_request() {
            return Err(CacheError::CircuitOpen);
        }

        // Attempted command: counted even if the connection then fails.
        self.inner.stats.record_operation();
        CommandMetrics::record_operation();

        // Timing starts before checkout so a first-use connection
        // establish is part of the recorded latency.
        let start = Instant::now();

        let conn = self.inner.pool.checkout();
        // Connect failures do their own circuit and event accounting
        // inside the pool slot.
        let handle = conn.handle().await?;

        let timeout_ms = self.inner.settings.pool.command_timeout_ms;

        match timeout(Duration::from_millis(timeout_ms), op(handle)).await {
            Ok(Ok(value)) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.inner.latency.record(elapsed_ms);
                CommandMetrics::record_latency_ms(elapsed_ms);
                self.inner.circuit.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    conn.disconnect().await;
                }
                self.account_failure(conn.index(), &e.to_string());
                Err(CacheError::Connection(e))
            }
            Err(_) => {
                // A timed-out command is a connection error for breaker
                // accounting; the connection is suspect, drop it.
                conn.disconnect().await;
                let message = format!("command timed out after {}ms", timeout_ms);
                self.account_failure(conn.index(), &message);
                Err(CacheError::Timeout(timeout_ms))
            }
        }
    }

    fn account_failure(&self, index: usize, message: &str) {
        self.inner.circuit.record_failure();
        CommandMetrics::record_connection_error();
        self.inner.events.emit(CacheEvent::Error {
            index,
            message: message.to_string(),
        });
        tracing::error!(index = index, error = %message, "cache command failed");
    }

    /// Get a value. Returns `None` (and counts a miss) when the key is
    /// absent.
    pub async fn get<V: FromRedisValue>(&self, key: &str) -> Result<Option<V>> {
        let value: Option<V> = self
            .execute(|mut conn| async move { conn.get(key).await })
            .await?;

        if value.is_some() {
            self.inner.stats.record_hit();
            CommandMetrics::record_hit();
        } else {
            self.inner.stats.record_miss();
            CommandMetrics::record_miss();
        }
        Ok(value)
    }

    /// Set a value, optionally with a TTL.
    pub async fn set<V>(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<()>
    where
        V: ToRedisArgs + Send + Sync,
    {
        self.execute(|mut conn| async move {
            match ttl {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await,
                None => conn.set::<_, _, ()>(key, value).await,
            }
        })
        .await
    }

    /// Delete a key, returning the number of keys removed.
    pub async fn del(&self, key: &str) -> Result<i64> {
        self.execute(|mut conn| async move { conn.del(key).await })
            .await
    }

    /// Get several keys at once; absent keys yield `None` in place.
    pub async fn mget<V: FromRedisValue>(&self, keys: &[&str]) -> Result<Vec<Option<V>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.execute(|mut conn| async move { conn.mget(keys).await })
            .await
    }

    /// Set several key/value pairs at once.
    pub async fn mset<V>(&self, items: &[(&str, V)]) -> Result<()>
    where
        V: ToRedisArgs + Send + Sync,
    {
        if items.is_empty() {
            return Ok(());
        }
        self.execute(|mut conn| async move { conn.mset::<_, _, ()>(items).await })
            .await
    }

    /// Start a pipelined batch on a checked-out connection.
    ///
    /// Subject to the circuit-open precondition like any command, but
    /// batch execution bypasses per-command latency recording.
    pub async fn pipeline(&self) -> Result<CacheBatch> {
        self.batch(false).await
    }

    /// Start a MULTI/EXEC transaction on a checked-out connection.
    pub async fn multi(&self) -> Result<CacheBatch> {
        self.batch(true).await
    }

    async fn batch(&self, atomic: bool) -> Result<CacheBatch> {
        if !self.inner.circuit.allow_request() {
            return Err(CacheError::CircuitOpen);
        }

        let conn = self.inner.pool.checkout();
        let handle = conn.handle().await?;

        let mut pipe = redis::pipe();
        if atomic {
            pipe.atomic();
        }

        Ok(CacheBatch { pipe, conn: handle })
    }

    /// Snapshot of hit/miss/operation counters and the latest latency
    /// percentiles.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Reset all counters and discard buffered latency samples.
    pub fn flush_stats(&self) {
        self.inner.stats.flush();
        self.inner.latency.clear();
        tracing::debug!("cache stats flushed");
    }

    /// Manually reset the circuit breaker.
    ///
    /// Zeroes the error counter, re-permits operations, and kicks off a
    /// fire-and-forget reconnect of every pooled connection. Reconnect
    /// failures are logged, never surfaced here.
    pub async fn reset_circuit_breaker(&self) {
        self.inner.circuit.reset();

        let backoff = BackoffConfig::from_retry_delay(self.inner.settings.pool.retry_delay_ms);
        let max_retries = self.inner.settings.pool.max_retries;

        for conn in self.inner.pool.connections() {
            let conn = conn.clone();
            let backoff = backoff.clone();
            tokio::spawn(async move {
                if let Err(e) = conn.reconnect(backoff, max_retries).await {
                    tracing::warn!(
                        index = conn.index(),
                        error = %e,
                        "reconnect during circuit reset failed"
                    );
                }
            });
        }
    }

    /// Shut the client down: stop the health monitor, close every pooled
    /// connection, and emit the `shutdown` event. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.inner.shutdown_tx.send(());

        let handle = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.inner.pool.disconnect_all().await;
        self.inner.events.emit(CacheEvent::Shutdown);
        tracing::info!("cache client shut down");
    }
}

/// A batch of commands bound to one checked-out connection.
///
/// Build up commands, then consume the batch with [`CacheBatch::query`].
pub struct CacheBatch {
    pipe: redis::Pipeline,
    conn: MultiplexedConnection,
}

impl CacheBatch {
    pub fn get(&mut self, key: &str) -> &mut Self {
        self.pipe.get(key);
        self
    }

    pub fn set<V: ToRedisArgs>(&mut self, key: &str, value: V) -> &mut Self {
        self.pipe.set(key, value);
        self
    }

    pub fn del(&mut self, key: &str) -> &mut Self {
        self.pipe.del(key);
        self
    }

    /// Direct access to the underlying pipeline for commands without a
    /// dedicated builder.
    pub fn pipeline_mut(&mut self) -> &mut redis::Pipeline {
        &mut self.pipe
    }

    /// Execute the batch and decode the replies.
    pub async fn query<T: FromRedisValue>(mut self) -> Result<T> {
        Ok(self.pipe.query_async(&mut self.conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Port 9 (discard) refuses connections, giving deterministic
    // connection errors without a running cache service.
    const UNREACHABLE: &str = "redis://127.0.0.1:9";

    fn unreachable_client() -> CacheClient {
        let mut settings = CacheSettings::from_url(UNREACHABLE);
        settings.pool.pool_size = 5;
        settings.pool.circuit_breaker_threshold = 5;
        settings.pool.retry_delay_ms = 60_000; // keep the circuit open for the test
        settings.pool.health_check_interval_ms = 3_600_000; // effectively off
        settings.pool.command_timeout_ms = 500;
        CacheClient::connect(settings).unwrap()
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_config() {
        let settings = CacheSettings::from_url("");
        assert!(matches!(
            CacheClient::connect(settings),
            Err(CacheError::Config(_))
        ));

        let mut settings = CacheSettings::from_url(UNREACHABLE);
        settings.pool.pool_size = 0;
        assert!(matches!(
            CacheClient::connect(settings),
            Err(CacheError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_five_errors_open_circuit_and_sixth_fails_fast() {
        let client = unreachable_client();

        for i in 0..5 {
            let result = client.set("key", "value", None).await;
            assert!(
                matches!(result, Err(CacheError::Connection(_))),
                "attempt {} should be a connection error",
                i
            );
        }

        assert_eq!(client.circuit_state(), CircuitState::CircuitOpen);

        // Sixth call is short-circuited without touching the pool
        let result = client.set("key", "value", None).await;
        assert!(matches!(result, Err(CacheError::CircuitOpen)));

        // Only the five attempted commands were counted
        assert_eq!(client.stats().operations, 5);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_error_events_and_circuit_open_event() {
        let client = unreachable_client();
        let mut rx = client.subscribe();

        for _ in 0..5 {
            let _ = client.del("key").await;
        }

        let mut saw_error = false;
        let mut saw_open = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                CacheEvent::Error { .. } => saw_error = true,
                CacheEvent::CircuitOpen => saw_open = true,
                _ => {}
            }
        }
        assert!(saw_error);
        assert!(saw_open);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_reopens_the_gate() {
        let client = unreachable_client();

        for _ in 0..5 {
            let _ = client.del("key").await;
        }
        assert_eq!(client.circuit_state(), CircuitState::CircuitOpen);

        client.reset_circuit_breaker().await;
        assert_ne!(client.circuit_state(), CircuitState::CircuitOpen);
        assert_eq!(client.circuit_snapshot().error_count, 0);

        // Commands are attempted again (and fail at the transport, not
        // the breaker)
        let result = client.del("key").await;
        assert!(matches!(result, Err(CacheError::Connection(_))));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_flush_stats_resets_counters() {
        let client = unreachable_client();

        let _ = client.del("key").await;
        assert_eq!(client.stats().operations, 1);

        client.flush_stats();
        assert_eq!(client.stats().operations, 0);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_mget_and_mset_skip_the_pool() {
        let client = unreachable_client();

        let values: Vec<Option<String>> = client.mget(&[]).await.unwrap();
        assert!(values.is_empty());
        client.mset::<&str>(&[]).await.unwrap();

        // Nothing was attempted
        assert_eq!(client.stats().operations, 0);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_pipeline_refused_when_circuit_open() {
        let client = unreachable_client();

        for _ in 0..5 {
            let _ = client.del("key").await;
        }
        assert_eq!(client.circuit_state(), CircuitState::CircuitOpen);

        assert!(matches!(
            client.pipeline().await,
            Err(CacheError::CircuitOpen)
        ));
        assert!(matches!(client.multi().await, Err(CacheError::CircuitOpen)));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_emits_event() {
        let client = unreachable_client();
        let mut rx = client.subscribe();

        client.shutdown().await;
        client.shutdown().await;

        let mut shutdown_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, CacheEvent::Shutdown) {
                shutdown_events += 1;
            }
        }
        assert_eq!(shutdown_events, 1);
    }
}
