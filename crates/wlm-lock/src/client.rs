//! Telemetry ingestion client.
//!
//! This module provides the `IngestionClient` which handles:
//! - Connection to the telemetry server over TCP
//! - Automatic reconnection with exponential backoff
//! - Decoding the record stream and publishing the latest record
//!
//! The connection state is `Disconnected → Connecting → Streaming →
//! Disconnected` and is published on a `watch` channel. Decoded records
//! are published on another `watch` channel: a slow consumer only ever
//! sees the newest record, never a backlog.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wlm_protocol::{Record, RecordCodec};

/// Consecutive malformed records that force a reconnect.
pub const DEFAULT_MAX_MALFORMED: usize = 5;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the ingestion client.
///
/// # Example
///
/// ```rust
/// use wlm_lock::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig {
///     server: "192.168.1.20:50000".to_string(),
///     retry_initial_delay: Duration::from_millis(250),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Telemetry server address (`host:port`).
    pub server: String,

    /// Initial delay before the first retry after a failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub retry_multiplier: f64,

    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,

    /// Silence while streaming that counts as a lost connection.
    pub stale_timeout: Duration,

    /// Consecutive malformed records tolerated before reconnecting.
    pub max_malformed: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:50000".to_string(),
            retry_initial_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            retry_multiplier: 2.0,
            connect_timeout: Duration::from_secs(3),
            stale_timeout: Duration::from_secs(5),
            max_malformed: DEFAULT_MAX_MALFORMED,
        }
    }
}

impl ClientConfig {
    /// Next backoff delay after `delay`, capped at `retry_max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next_delay_ms = (delay.as_millis() as f64 * self.retry_multiplier) as u64;
        Duration::from_millis(next_delay_ms).min(self.retry_max_delay)
    }
}

// ============================================================================
// Connection State
// ============================================================================

/// Connection state of the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

/// Published connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,

    /// Connection attempts since the last successful stream
    pub attempt: u32,

    /// Records received over all connections
    pub records: u64,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            records: 0,
        }
    }
}

/// Latest decoded record, `None` before the first one arrives.
pub type LatestRecord = Option<Arc<Record>>;

// ============================================================================
// Errors
// ============================================================================

/// Reasons a connection ends.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {addr}: {error}")]
    Connect { addr: String, error: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No record for {0:?}")]
    Stale(Duration),

    #[error("Stream out of sync after {0} malformed records")]
    Desync(usize),
}

/// How a streaming session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// Server closed the connection
    Eof,

    /// Client was cancelled
    Cancelled,
}

// ============================================================================
// Ingestion Client
// ============================================================================

/// Client that keeps one connection to the telemetry server.
///
/// # Example
///
/// ```rust,ignore
/// let cancel = CancellationToken::new();
/// let client = IngestionClient::new(ClientConfig::default(), cancel.clone());
/// let mut records = client.records();
/// tokio::spawn(async move { client.run().await });
///
/// while records.changed().await.is_ok() {
///     let latest = records.borrow_and_update().clone();
///     // ...
/// }
/// ```
pub struct IngestionClient {
    /// Configuration for connection behavior.
    config: ClientConfig,

    /// Published connection status.
    status_tx: watch::Sender<ConnectionStatus>,

    /// Published latest record.
    record_tx: watch::Sender<LatestRecord>,

    /// Cancellation token for graceful shutdown.
    cancel_token: CancellationToken,
}

impl IngestionClient {
    /// Creates a new client. Nothing connects until [`run`](Self::run).
    #[must_use]
    pub fn new(config: ClientConfig, cancel_token: CancellationToken) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let (record_tx, _) = watch::channel(None);
        Self {
            config,
            status_tx,
            record_tx,
            cancel_token,
        }
    }

    /// Subscribes to connection status changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribes to the latest decoded record.
    pub fn records(&self) -> watch::Receiver<LatestRecord> {
        self.record_tx.subscribe()
    }

    /// Main loop that maintains the connection.
    ///
    /// Runs until the cancellation token is triggered. Every failure
    /// returns to `Disconnected` and waits out the backoff delay before
    /// the next attempt.
    pub async fn run(&self) {
        info!(server = %self.config.server, "Ingestion client starting");

        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }

            attempt = attempt.saturating_add(1);
            self.set_state(ConnectionState::Connecting, attempt);
            debug!(attempt, server = %self.config.server, "Attempting to connect");

            match self.connect().await {
                Ok(stream) => {
                    info!(server = %self.config.server, attempt, "Connected, streaming");
                    self.set_state(ConnectionState::Streaming, attempt);

                    let mut received = 0u64;
                    let result = self.stream_records(stream, &mut received).await;

                    // A connection that delivered data resets the backoff
                    if received > 0 {
                        delay = self.config.retry_initial_delay;
                        attempt = 0;
                    }

                    match result {
                        Ok(StreamEnd::Cancelled) => break,
                        Ok(StreamEnd::Eof) => {
                            warn!(received, "Server closed the connection");
                        }
                        Err(e) => {
                            warn!(error = %e, received, "Connection lost");
                        }
                    }
                }
                Err(e) => {
                    if attempt == 1 {
                        warn!(error = %e, "Server unreachable, will retry");
                    } else {
                        debug!(attempt, error = %e, "Connection attempt failed");
                    }
                }
            }

            self.set_state(ConnectionState::Disconnected, attempt);

            // Wait before retry, checking for cancellation
            tokio::select! {
                _ = sleep(delay) => {
                    delay = self.config.next_delay(delay);
                }
                _ = self.cancel_token.cancelled() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected, attempt);
        info!("Ingestion client shutting down");
    }

    async fn connect(&self) -> Result<TcpStream, ClientError> {
        let connect_error = |error: String| ClientError::Connect {
            addr: self.config.server.clone(),
            error,
        };

        match timeout(self.config.connect_timeout, TcpStream::connect(&self.config.server)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                Ok(stream)
            }
            Ok(Err(e)) => Err(connect_error(e.to_string())),
            Err(_) => Err(connect_error(format!(
                "timed out after {:?}",
                self.config.connect_timeout
            ))),
        }
    }

    /// Reads records until the connection ends or the client is cancelled.
    async fn stream_records(
        &self,
        stream: TcpStream,
        received: &mut u64,
    ) -> Result<StreamEnd, ClientError> {
        let mut framed = FramedRead::new(stream, RecordCodec::new());
        let mut malformed = 0usize;

        loop {
            let next = tokio::select! {
                _ = self.cancel_token.cancelled() => return Ok(StreamEnd::Cancelled),
                next = timeout(self.config.stale_timeout, framed.next()) => next,
            };

            match next {
                Err(_) => return Err(ClientError::Stale(self.config.stale_timeout)),
                Ok(None) => return Ok(StreamEnd::Eof),
                Ok(Some(Err(e))) => return Err(ClientError::Io(e)),
                Ok(Some(Ok(Err(e)))) => {
                    malformed += 1;
                    warn!(error = %e, consecutive = malformed, "Dropping malformed record");
                    if malformed >= self.config.max_malformed {
                        return Err(ClientError::Desync(malformed));
                    }
                }
                Ok(Some(Ok(Ok(record)))) => {
                    malformed = 0;
                    *received += 1;
                    self.record_tx.send_replace(Some(Arc::new(record)));
                    self.status_tx.send_modify(|s| s.records += 1);
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState, attempt: u32) {
        self.status_tx.send_if_modified(|s| {
            let changed = s.state != state || s.attempt != attempt;
            s.state = state;
            s.attempt = attempt;
            changed
        });
    }
}

/// Spawns the ingestion loop as a task.
pub fn spawn_client(client: Arc<IngestionClient>) -> JoinHandle<()> {
    tokio::spawn(async move { client.run().await })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn fast_config(server: String) -> ClientConfig {
        ClientConfig {
            server,
            retry_initial_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(50),
            stale_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    async fn wait_for<T: Clone>(
        rx: &mut watch::Receiver<T>,
        mut pred: impl FnMut(&T) -> bool,
    ) -> T {
        timeout(Duration::from_secs(5), async {
            loop {
                {
                    let value = rx.borrow_and_update().clone();
                    if pred(&value) {
                        return value;
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("condition within timeout")
    }

    // ------------------------------------------------------------------------
    // ClientConfig Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.server, "127.0.0.1:50000");
        assert_eq!(config.retry_initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_malformed, DEFAULT_MAX_MALFORMED);
        assert!((config.retry_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        let config = ClientConfig::default();
        let delay2 = config.next_delay(config.retry_initial_delay);
        assert_eq!(delay2, Duration::from_secs(1));
        assert_eq!(config.next_delay(delay2), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let config = ClientConfig {
            retry_max_delay: Duration::from_secs(10),
            retry_multiplier: 10.0,
            ..Default::default()
        };
        let delay2 = config.next_delay(Duration::from_secs(1));
        assert_eq!(delay2, Duration::from_secs(10));
        assert_eq!(config.next_delay(delay2), Duration::from_secs(10));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Streaming.to_string(), "streaming");
        assert_eq!(ConnectionStatus::default().state, ConnectionState::Disconnected);
    }

    // ------------------------------------------------------------------------
    // Streaming Tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_client_respects_cancellation() {
        let cancel_token = CancellationToken::new();
        // Port 9 (discard) on localhost is almost never listening
        let client = IngestionClient::new(fast_config("127.0.0.1:9".into()), cancel_token.clone());

        cancel_token.cancel();

        let start = std::time::Instant::now();
        client.run().await;
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(client.status().borrow().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_publishes_latest_record() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"100,200\n300,400\n").await.unwrap();
            // Keep the connection open
            sleep(Duration::from_secs(10)).await;
        });

        let cancel = CancellationToken::new();
        let client = Arc::new(IngestionClient::new(fast_config(addr), cancel.clone()));
        let mut records = client.records();
        let mut status = client.status();
        let task = spawn_client(Arc::clone(&client));

        wait_for(&mut status, |s| s.state == ConnectionState::Streaming).await;
        let latest = wait_for(&mut records, |r| {
            r.as_ref().and_then(|r| r.get(0)).map(|f| f.units()) == Some(300)
        })
        .await;
        assert_eq!(latest.unwrap().len(), 2);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(client.status().borrow().state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_malformed_records_are_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"100,200\ngarbage\n1,2,3\n500,600\n").await.unwrap();
            sleep(Duration::from_secs(10)).await;
        });

        let cancel = CancellationToken::new();
        let client = Arc::new(IngestionClient::new(fast_config(addr), cancel.clone()));
        let mut records = client.records();
        let task = spawn_client(Arc::clone(&client));

        wait_for(&mut records, |r| {
            r.as_ref().and_then(|r| r.get(1)).map(|f| f.units()) == Some(600)
        })
        .await;
        // Still on the first connection
        assert_eq!(client.status().borrow().state, ConnectionState::Streaming);
        assert_eq!(client.status().borrow().records, 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_desync_forces_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (accepted_tx, mut accepted_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let _ = accepted_tx.send(());
                let _ = socket.write_all(b"x\nx\nx\nx\nx\nx\n").await;
                tokio::spawn(async move {
                    sleep(Duration::from_secs(10)).await;
                    drop(socket);
                });
            }
        });

        let cancel = CancellationToken::new();
        let client = Arc::new(IngestionClient::new(fast_config(addr), cancel.clone()));
        let task = spawn_client(Arc::clone(&client));

        // Two accepts mean the client gave up on the first connection
        timeout(Duration::from_secs(5), async {
            accepted_rx.recv().await.unwrap();
            accepted_rx.recv().await.unwrap();
        })
        .await
        .expect("client reconnected after desync");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_one_channel_server_without_values_keeps_streaming() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (accepted_tx, mut accepted_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let _ = accepted_tx.send(());
                tokio::spawn(async move {
                    // One channel that has never produced a value
                    if socket.write_all(b"\n\n\n\n\n\n\n").await.is_err() {
                        return;
                    }
                    loop {
                        sleep(Duration::from_millis(50)).await;
                        if socket.write_all(b"\n").await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        let cancel = CancellationToken::new();
        let client = Arc::new(IngestionClient::new(fast_config(addr), cancel.clone()));
        let mut status = client.status();
        let mut records = client.records();
        let task = spawn_client(Arc::clone(&client));

        let streaming = wait_for(&mut status, |s| s.records >= 6).await;
        assert_eq!(streaming.state, ConnectionState::Streaming);
        let latest = wait_for(&mut records, |r| r.is_some()).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest.get(0), None);

        // Well past the point where five bad records would have forced a reconnect
        sleep(Duration::from_millis(200)).await;
        assert_eq!(client.status().borrow().state, ConnectionState::Streaming);
        accepted_rx.recv().await.unwrap();
        assert!(accepted_rx.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_connection_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (accepted_tx, mut accepted_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                let _ = accepted_tx.send(());
                // Never write anything
                held.push(socket);
            }
        });

        let cancel = CancellationToken::new();
        let config = ClientConfig {
            stale_timeout: Duration::from_millis(100),
            ..fast_config(addr)
        };
        let client = Arc::new(IngestionClient::new(config, cancel.clone()));
        let task = spawn_client(Arc::clone(&client));

        timeout(Duration::from_secs(5), async {
            accepted_rx.recv().await.unwrap();
            accepted_rx.recv().await.unwrap();
        })
        .await
        .expect("client reconnected after silence");

        cancel.cancel();
        task.await.unwrap();
    }
}
