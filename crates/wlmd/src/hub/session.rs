//! One connected telemetry client.
//!
//! A session drains its queue in order, encodes each snapshot as one
//! record and writes it to the socket. It ends on the first write error,
//! a write that exceeds the timeout, peer EOF, eviction by the hub, or
//! server shutdown. There is no retry; the client reconnects.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wlm_core::Snapshot;
use wlm_protocol::Record;

use super::{BroadcastHub, SessionId};

/// Size of the scratch buffer used to watch the read half for EOF.
const DISCARD_BUF_LEN: usize = 256;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed or reset the connection
    PeerClosed,

    /// Writing a record failed
    WriteFailed,

    /// Writing a record took longer than the write timeout
    WriteTimeout,

    /// The hub removed the session (stalled queue or close-all)
    Dropped,

    /// The server is shutting down
    Shutdown,
}

/// Errors on the write path of a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Write timeout after {0:?}")]
    WriteTimeout(Duration),
}

impl From<&SessionError> for CloseReason {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Io(_) => CloseReason::WriteFailed,
            SessionError::WriteTimeout(_) => CloseReason::WriteTimeout,
        }
    }
}

/// Writer side of one accepted connection.
pub struct Session<R, W> {
    id: SessionId,
    peer: SocketAddr,
    reader: R,
    writer: W,
    queue: mpsc::Receiver<Arc<Snapshot>>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    hub: BroadcastHub,
    write_timeout: Duration,
    records_sent: u64,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        id: SessionId,
        peer: SocketAddr,
        reader: R,
        writer: W,
        queue: mpsc::Receiver<Arc<Snapshot>>,
        cancel: CancellationToken,
        shutdown: CancellationToken,
        hub: BroadcastHub,
    ) -> Self {
        let write_timeout = hub.config().write_timeout;
        Self {
            id,
            peer,
            reader,
            writer,
            queue,
            cancel,
            shutdown,
            hub,
            write_timeout,
            records_sent: 0,
        }
    }

    /// Returns the session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Serves the connection until it closes, then unregisters from the hub.
    pub async fn run(mut self) -> CloseReason {
        info!(session_id = %self.id, peer = %self.peer, "Client connected");

        let reason = self.pump().await;

        self.hub.unregister(self.id).await;
        let _ = self.writer.shutdown().await;

        info!(
            session_id = %self.id,
            peer = %self.peer,
            reason = ?reason,
            records = self.records_sent,
            "Client disconnected"
        );
        reason
    }

    async fn pump(&mut self) -> CloseReason {
        let mut discard = [0u8; DISCARD_BUF_LEN];

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return if self.shutdown.is_cancelled() {
                        CloseReason::Shutdown
                    } else {
                        CloseReason::Dropped
                    };
                }

                next = self.queue.recv() => {
                    let Some(snapshot) = next else {
                        return CloseReason::Dropped;
                    };
                    if let Err(e) = self.send(&snapshot).await {
                        debug!(session_id = %self.id, error = %e, "Write failed");
                        return CloseReason::from(&e);
                    }
                }

                // Clients never send anything; reading only detects EOF
                read = self.reader.read(&mut discard) => {
                    match read {
                        Ok(0) | Err(_) => return CloseReason::PeerClosed,
                        Ok(n) => debug!(session_id = %self.id, bytes = n, "Ignoring inbound data"),
                    }
                }
            }
        }
    }

    /// Encodes one snapshot and writes it within the write timeout.
    async fn send(&mut self, snapshot: &Snapshot) -> Result<(), SessionError> {
        let line = Record::from_snapshot(snapshot).encode();
        let writer = &mut self.writer;

        match timeout(self.write_timeout, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => {
                self.records_sent += 1;
                Ok(())
            }
            Ok(Err(e)) => Err(SessionError::Io(e.to_string())),
            Err(_) => Err(SessionError::WriteTimeout(self.write_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};
    use wlm_core::{ChannelIndex, ChannelReading, Frequency};

    fn peer() -> SocketAddr {
        "127.0.0.1:40001".parse().unwrap()
    }

    fn snapshot(seq: u64, units: &[i64]) -> Arc<Snapshot> {
        Arc::new(Snapshot::new(
            seq,
            units
                .iter()
                .enumerate()
                .map(|(i, u)| ChannelReading::live(ChannelIndex::new(i as u32), Frequency::from_units(*u)))
                .collect(),
        ))
    }

    #[tokio::test]
    async fn test_writes_records_in_publish_order() {
        let hub = BroadcastHub::default();
        let shutdown = CancellationToken::new();
        let (server_io, client_io) = duplex(4096);
        let (reader, writer) = tokio::io::split(server_io);

        let session = hub.register(peer(), reader, writer, &shutdown).await;
        let task = tokio::spawn(session.run());

        hub.publish(snapshot(0, &[71_096_242_000, 65_050_380_000])).await;
        hub.publish(snapshot(1, &[71_096_242_001, 65_050_380_001])).await;

        let mut lines = BufReader::new(client_io).lines();
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "71096242000,65050380000"
        );
        assert_eq!(
            lines.next_line().await.unwrap().unwrap(),
            "71096242001,65050380001"
        );

        shutdown.cancel();
        assert_eq!(task.await.unwrap(), CloseReason::Shutdown);
        assert_eq!(hub.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_peer_eof_ends_session() {
        let hub = BroadcastHub::default();
        let shutdown = CancellationToken::new();
        let (server_io, client_io) = duplex(1024);
        let (reader, writer) = tokio::io::split(server_io);

        let session = hub.register(peer(), reader, writer, &shutdown).await;
        let task = tokio::spawn(session.run());

        drop(client_io);
        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
        assert_eq!(hub.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_writer_times_out() {
        let hub = BroadcastHub::new(HubConfig {
            queue_depth: 64,
            write_timeout: Duration::from_millis(200),
        });
        let shutdown = CancellationToken::new();
        // Tiny pipe that nobody drains
        let (server_io, _client_io) = duplex(16);
        let (reader, writer) = tokio::io::split(server_io);

        let session = hub.register(peer(), reader, writer, &shutdown).await;
        let task = tokio::spawn(session.run());

        hub.publish(snapshot(0, &[71_096_242_000, 65_050_380_000])).await;

        assert_eq!(task.await.unwrap(), CloseReason::WriteTimeout);
        assert_eq!(hub.session_count().await, 0);

        // Nothing left to write to
        let report = hub.publish(snapshot(1, &[1, 2])).await;
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_eviction_is_reported_as_dropped() {
        let hub = BroadcastHub::default();
        let shutdown = CancellationToken::new();
        let (server_io, _client_io) = duplex(1024);
        let (reader, writer) = tokio::io::split(server_io);

        let session = hub.register(peer(), reader, writer, &shutdown).await;
        let task = tokio::spawn(session.run());

        hub.close_all().await;
        assert_eq!(task.await.unwrap(), CloseReason::Dropped);
        assert!(!shutdown.is_cancelled());
    }
}
