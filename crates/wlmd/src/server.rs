//! TCP server for the telemetry stream.
//!
//! The server:
//! - Listens on one TCP port, accepting any number of clients
//! - Registers each connection with the [`BroadcastHub`] and spawns its
//!   [`Session`](crate::hub::Session) into a `JoinSet`
//! - Starts streaming immediately; there is no handshake
//! - On cancellation, closes every session and waits a bounded grace
//!   period before aborting whatever is left
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the loop keeps accepting

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::{BroadcastHub, CloseReason};

/// Time allowed for sessions to finish after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// TCP server that hands accepted connections to the hub.
pub struct TelemetryServer {
    /// Session registry and fan-out
    hub: BroadcastHub,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connections accepted so far
    connection_counter: AtomicU64,

    /// Grace period for sessions on shutdown
    shutdown_grace: Duration,
}

impl TelemetryServer {
    /// Creates a server.
    pub fn new(hub: BroadcastHub, cancel_token: CancellationToken) -> Self {
        Self {
            hub,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }

    /// Overrides the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Binds the listening socket.
    pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            error: e.to_string(),
        })
    }

    /// Number of connections accepted since start.
    pub fn connections_accepted(&self) -> u64 {
        self.connection_counter.load(Ordering::Relaxed)
    }

    /// Runs the accept loop on an already bound listener.
    ///
    /// Does not return until the cancellation token is triggered and all
    /// sessions have been closed or aborted.
    pub async fn run(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: "<bound listener>".to_string(),
            error: e.to_string(),
        })?;
        info!(addr = %local, "Telemetry server listening");

        let mut sessions: JoinSet<CloseReason> = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(&mut sessions, stream, peer).await,
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }

                // Reap finished sessions so the set does not grow
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Session task failed");
                    }
                }
            }
        }

        self.shutdown(sessions).await;
        Ok(())
    }

    async fn handle_connection(
        &self,
        sessions: &mut JoinSet<CloseReason>,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let session = self
            .hub
            .register(peer, reader, writer, &self.cancel_token)
            .await;
        debug!(connection = conn_num, session_id = %session.id(), "Accepted connection");
        sessions.spawn(session.run());
    }

    /// Closes all sessions in bounded time.
    async fn shutdown(&self, mut sessions: JoinSet<CloseReason>) {
        self.hub.close_all().await;

        let pending = sessions.len();
        let drained = timeout(self.shutdown_grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Sessions did not close in time, aborting"
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        info!(sessions = pending, "Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:50000".to_string(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("0.0.0.0:50000"));
        assert!(err.to_string().contains("address in use"));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = TelemetryServer::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let err = TelemetryServer::bind("not-an-address").await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_run_returns_after_cancel() {
        let cancel = CancellationToken::new();
        let server = TelemetryServer::new(BroadcastHub::default(), cancel.clone());
        let listener = TelemetryServer::bind("127.0.0.1:0").await.unwrap();

        cancel.cancel();
        assert!(server.run(listener).await.is_ok());
        assert_eq!(server.connections_accepted(), 0);
    }
}
