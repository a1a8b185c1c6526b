//! Integration tests for the telemetry server.
//!
//! These tests start a complete daemon (Poller, hub and TCP server) on an
//! ephemeral localhost port and talk to it with plain TCP clients.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use wlm_core::{Channel, ChannelIndex, Frequency};
use wlm_protocol::Record;
use wlmd::{Daemon, DaemonError, MeasurementSource, ServerConfig, SimulatedSource, SourceError};

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for any single record
const RECORD_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum time to wait for the hub to notice a change
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between hub state checks
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

/// Source whose channel `c` reads `(c + 1) * 1e9 + tick`.
///
/// Reports the meter as gone once `fail_after` ticks have been read.
struct CountingSource {
    tick: i64,
    fail_after: Option<i64>,
}

#[async_trait]
impl MeasurementSource for CountingSource {
    fn name(&self) -> &str {
        "counting"
    }

    async fn read(&mut self, channel: ChannelIndex) -> Result<Frequency, SourceError> {
        if channel.get() == 0 {
            self.tick += 1;
        }
        if self.fail_after.is_some_and(|n| self.tick > n) {
            return Err(SourceError::DriverUnavailable("meter unplugged".into()));
        }
        Ok(Frequency::from_units(
            (channel.get() as i64 + 1) * 1_000_000_000 + self.tick,
        ))
    }
}

fn test_config(channels: u32) -> ServerConfig {
    ServerConfig {
        port: 0,
        bind_host: "127.0.0.1".to_string(),
        update_rate: 0.01,
        channels: Channel::defaults(channels),
        ..Default::default()
    }
}

/// Running daemon plus the token that stops it.
struct TestDaemon {
    daemon: Daemon,
    cancel: CancellationToken,
}

impl TestDaemon {
    async fn spawn_with(config: ServerConfig, source: Box<dyn MeasurementSource>) -> Self {
        let cancel = CancellationToken::new();
        let daemon = Daemon::start(&config, source, cancel.clone())
            .await
            .expect("start daemon");
        Self { daemon, cancel }
    }

    async fn spawn(channels: u32) -> Self {
        let source = CountingSource {
            tick: 0,
            fail_after: None,
        };
        Self::spawn_with(test_config(channels), Box::new(source)).await
    }

    fn addr(&self) -> SocketAddr {
        self.daemon.local_addr()
    }

    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr()).await.expect("connect");
        TestClient::new(stream)
    }

    async fn wait_for_sessions(&self, expected: usize) {
        let result = timeout(SETTLE_TIMEOUT, async {
            while self.daemon.hub().session_count().await != expected {
                sleep(POLL_INTERVAL).await;
            }
        })
        .await;
        assert!(result.is_ok(), "hub never reached {expected} sessions");
    }

    async fn shutdown(self) -> Result<(), DaemonError> {
        self.cancel.cancel();
        self.daemon.wait().await
    }
}

/// Plain TCP client reading newline-terminated records.
struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    _writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            _writer: writer,
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        timeout(RECORD_TIMEOUT, self.lines.next_line())
            .await
            .expect("record within timeout")
            .expect("read line")
    }

    async fn next_record(&mut self) -> Record {
        let line = self.next_line().await.expect("stream open");
        Record::decode(&line).expect("valid record")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_records_stream_without_handshake() {
    let server = TestDaemon::spawn(4).await;
    let mut client = server.connect().await;

    let record = client.next_record().await;
    assert_eq!(record.len(), 4);
    for (position, value) in record.values().iter().enumerate() {
        let units = value.expect("channel present").units();
        assert_eq!(units / 1_000_000_000, position as i64 + 1);
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_records_arrive_in_publish_order() {
    let server = TestDaemon::spawn(2).await;
    let mut client = server.connect().await;

    let mut last = 0;
    for _ in 0..10 {
        let tick = client.next_record().await.get(0).unwrap().units();
        assert!(tick > last, "record {tick} after {last}");
        last = tick;
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_late_client_gets_no_replay() {
    let server = TestDaemon::spawn(1).await;
    let mut early = server.connect().await;

    let mut seen = 0;
    for _ in 0..5 {
        seen = early.next_record().await.get(0).unwrap().units();
    }

    let mut late = server.connect().await;
    let first = late.next_record().await.get(0).unwrap().units();
    assert!(first > seen, "late client saw {first}, already published {seen}");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_multiple_clients() {
    let server = TestDaemon::spawn(3).await;
    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(server.connect().await);
    }

    server.wait_for_sessions(5).await;
    for client in &mut clients {
        assert_eq!(client.next_record().await.len(), 3);
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disconnected_client_is_unregistered() {
    let server = TestDaemon::spawn(2).await;
    let mut keep = server.connect().await;
    let gone = server.connect().await;
    server.wait_for_sessions(2).await;

    drop(gone);
    server.wait_for_sessions(1).await;

    // The remaining client is unaffected
    assert_eq!(keep.next_record().await.len(), 2);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = TestDaemon::spawn(2).await;
    let mut client = server.connect().await;
    client.next_record().await;

    let result = timeout(Duration::from_secs(5), server.shutdown()).await;
    assert!(result.expect("shutdown in bounded time").is_ok());

    // Drain whatever was in flight, then EOF
    while client.next_line().await.is_some() {}
}

#[tokio::test]
async fn test_lost_source_stops_daemon() {
    let source = CountingSource {
        tick: 0,
        fail_after: Some(3),
    };
    let cancel = CancellationToken::new();
    let daemon = Daemon::start(&test_config(2), Box::new(source), cancel.clone())
        .await
        .unwrap();

    let result = timeout(Duration::from_secs(5), daemon.wait())
        .await
        .expect("daemon stops by itself");
    assert!(matches!(result, Err(DaemonError::Poller(_))));
    assert!(cancel.is_cancelled());
}

#[tokio::test]
async fn test_simulated_source_end_to_end() {
    let config = ServerConfig {
        debug: true,
        ..test_config(4)
    };
    let server = TestDaemon::spawn_with(config, Box::new(SimulatedSource::new(7))).await;
    let mut client = server.connect().await;

    let record = client.next_record().await;
    let cooling = Frequency::from_thz(710.96246).unwrap();
    assert!(record.get(0).unwrap().offset_mhz(cooling).abs() < 50.0);

    server.shutdown().await.unwrap();
}
