//! Per-line lock tasks.
//!
//! Every monitored line runs its own task that owns the line's
//! `LockController`. Evaluations of one line are serialized by the task;
//! different lines evaluate in parallel, so a slow actuator on one line
//! never delays another.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  watch<LatestRecord>  ┌──────────────┐     ┌──────────┐
//! │ IngestionClient  │──────────────────────▶│   LineTask   │────▶│ Actuator │
//! └──────────────────┘                       └──────────────┘     └──────────┘
//!                                               ▲        │
//!                              LineCommand      │        │  watch<LineStatus>
//!                              (mpsc + oneshot) │        ▼
//!                                            LineHandle (console, service)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wlm_core::Frequency;

mod actor;
mod commands;
mod handle;

pub use actor::LineTask;
pub use commands::{LineCommand, LineError};
pub use handle::LineHandle;

use crate::actuator::Actuator;
use crate::client::LatestRecord;
use crate::config::LineConfig;
use crate::controller::LockController;

/// Command buffer per line.
const COMMAND_BUFFER: usize = 16;

/// Spawns the task for one line and returns its handle.
///
/// The line starts `Unlocked` with no measurement. The returned
/// `JoinHandle` completes once the task has stopped and published its
/// final `Unlocked` status.
pub fn spawn_line(
    config: &LineConfig,
    target: Frequency,
    actuator: Arc<dyn Actuator>,
    records: watch::Receiver<LatestRecord>,
    actuator_timeout: Duration,
    cancel: CancellationToken,
) -> (LineHandle, JoinHandle<()>) {
    let controller = LockController::new(config.name.clone(), target, config.policy);
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (status_tx, status_rx) = watch::channel(controller.status());

    let task = LineTask::new(
        controller,
        config.channel,
        actuator,
        actuator_timeout,
        cmd_rx,
        records,
        status_tx,
        cancel,
    );
    let join = tokio::spawn(task.run());

    (LineHandle::new(config.name.clone(), cmd_tx, status_rx), join)
}
