//! Fan-out of snapshots to connected sessions.
//!
//! The hub owns the set of registered sessions. Each session has a small
//! bounded queue; [`BroadcastHub::publish`] pushes into every queue with
//! `try_send` and never waits. A session whose queue is full has a
//! writer that stopped draining it, so it is removed and cancelled on
//! the spot. The Poller is therefore never slowed down by a client.
//!
//! ```text
//!   Poller ──publish──▶ BroadcastHub ──try_send──▶ queue ──▶ Session ──▶ TCP
//!                             │                    queue ──▶ Session ──▶ TCP
//!                             └── full queue: evict + cancel
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A closed or full queue only ever removes that one session

mod session;

pub use session::{CloseReason, Session, SessionError};

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wlm_core::Snapshot;

/// Default number of snapshots buffered per session.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Default bound on a single session write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifier of a registered session, unique for the hub's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Returns the raw identifier.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Tuning of per-session delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Snapshots buffered per session before it counts as stalled
    pub queue_depth: usize,

    /// Bound on writing one record to a session's socket
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Sessions the snapshot was queued for
    pub delivered: usize,

    /// Sessions removed because they could not take the snapshot
    pub dropped: usize,
}

/// Hub-side record of a registered session.
struct SessionEntry {
    peer: SocketAddr,
    queue: mpsc::Sender<Arc<Snapshot>>,
    cancel: CancellationToken,
}

/// Type alias for the sessions map.
type SessionsMap = Arc<RwLock<HashMap<SessionId, SessionEntry>>>;

/// Registry of connected sessions and snapshot fan-out.
///
/// Cheap to clone; all clones share the same session set.
#[derive(Clone)]
pub struct BroadcastHub {
    sessions: SessionsMap,
    next_id: Arc<AtomicU64>,
    config: HubConfig,
}

impl BroadcastHub {
    /// Creates an empty hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Returns the delivery configuration.
    pub fn config(&self) -> HubConfig {
        self.config
    }

    /// Registers a connection and returns the session that serves it.
    ///
    /// The session only receives snapshots published after this call.
    /// Its cancellation token is a child of `shutdown`.
    pub async fn register<R, W>(
        &self,
        peer: SocketAddr,
        reader: R,
        writer: W,
        shutdown: &CancellationToken,
    ) -> Session<R, W>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let cancel = shutdown.child_token();
        let (id, queue) = self.insert(peer, cancel.clone()).await;
        Session::new(
            id,
            peer,
            reader,
            writer,
            queue,
            cancel,
            shutdown.clone(),
            self.clone(),
        )
    }

    /// Registers a bare queue without a connection behind it.
    ///
    /// Used where snapshots are consumed in-process.
    pub async fn attach(
        &self,
        peer: SocketAddr,
    ) -> (SessionId, mpsc::Receiver<Arc<Snapshot>>, CancellationToken) {
        let cancel = CancellationToken::new();
        let (id, queue) = self.insert(peer, cancel.clone()).await;
        (id, queue, cancel)
    }

    async fn insert(
        &self,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> (SessionId, mpsc::Receiver<Arc<Snapshot>>) {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));

        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id,
            SessionEntry {
                peer,
                queue: tx,
                cancel,
            },
        );
        debug!(session_id = %id, peer = %peer, sessions = sessions.len(), "Registered session");

        (id, rx)
    }

    /// Removes a session. Returns false if it was already gone.
    pub async fn unregister(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.remove(&id) {
            Some(entry) => {
                debug!(session_id = %id, peer = %entry.peer, "Unregistered session");
                true
            }
            None => false,
        }
    }

    /// Queues a snapshot for every registered session.
    ///
    /// Never waits on a session. Sessions whose queue is full or closed
    /// are removed and cancelled before this returns, so later publishes
    /// never see them again.
    pub async fn publish(&self, snapshot: Arc<Snapshot>) -> PublishReport {
        let sessions = self.sessions.read().await;
        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        for (id, entry) in sessions.iter() {
            match entry.queue.try_send(Arc::clone(&snapshot)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session_id = %id,
                        peer = %entry.peer,
                        seq = snapshot.seq(),
                        "Session stalled, dropping"
                    );
                    failed.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session_id = %id, "Session queue closed");
                    failed.push(*id);
                }
            }
        }

        // Need to drop read lock first
        drop(sessions);

        if !failed.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in failed {
                if let Some(entry) = sessions.remove(&id) {
                    entry.cancel.cancel();
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancels and removes every session.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for (_, entry) in sessions.drain() {
            entry.cancel.cancel();
        }
        if count > 0 {
            debug!(sessions = count, "Closed all sessions");
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
