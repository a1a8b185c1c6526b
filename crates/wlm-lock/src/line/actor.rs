//! Line task - owns one `LockController` and drives its actuator.
//!
//! The task wakes on three things: cancellation, an operator command, or
//! a new record from the ingestion client. Records arrive on a `watch`
//! channel, so a task busy with a slow actuator call skips straight to
//! the newest record once it is free again.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Reply send failures (caller gone) are ignored

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wlm_core::Frequency;

use super::commands::LineCommand;
use crate::actuator::{Actuator, ActuatorError};
use crate::client::LatestRecord;
use crate::controller::{Decision, LineStatus, LockController};

/// Per-line lock task.
pub struct LineTask {
    controller: LockController,

    /// Field position of this line in each record
    channel: usize,

    actuator: Arc<dyn Actuator>,
    actuator_timeout: Duration,

    receiver: mpsc::Receiver<LineCommand>,
    records: watch::Receiver<LatestRecord>,
    status_tx: watch::Sender<LineStatus>,
    cancel: CancellationToken,
}

impl LineTask {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        controller: LockController,
        channel: usize,
        actuator: Arc<dyn Actuator>,
        actuator_timeout: Duration,
        receiver: mpsc::Receiver<LineCommand>,
        records: watch::Receiver<LatestRecord>,
        status_tx: watch::Sender<LineStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            channel,
            actuator,
            actuator_timeout,
            receiver,
            records,
            status_tx,
            cancel,
        }
    }

    /// Runs until cancelled, then leaves the line `Unlocked`.
    pub async fn run(mut self) {
        info!(line = %self.controller.line(), channel = self.channel, "Line task starting");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },

                changed = self.records.changed() => {
                    if changed.is_err() {
                        debug!(line = %self.controller.line(), "Record source closed");
                        break;
                    }
                    self.on_record().await;
                }
            }
        }

        self.controller.set_enabled(false);
        self.publish();
        info!(line = %self.controller.line(), "Line task stopped, line unlocked");
    }

    fn handle_command(&mut self, cmd: LineCommand) {
        let respond_to = match cmd {
            LineCommand::SetEnabled {
                enabled,
                respond_to,
            } => {
                self.controller.set_enabled(enabled);
                info!(line = %self.controller.line(), mode = %self.controller.mode(), "Lock mode changed");
                respond_to
            }
            LineCommand::SetTarget { target, respond_to } => {
                self.controller.set_target(target);
                info!(line = %self.controller.line(), target = %target, "Target changed");
                respond_to
            }
            LineCommand::Reset { respond_to } => {
                self.controller.reset();
                info!(line = %self.controller.line(), "Line reset");
                respond_to
            }
            LineCommand::Status { respond_to } => respond_to,
        };

        let status = self.publish();
        let _ = respond_to.send(status);
    }

    async fn on_record(&mut self) {
        // Only the newest record counts; the borrow must not outlive this block
        let measured: Option<Frequency> = {
            let latest = self.records.borrow_and_update();
            latest.as_ref().and_then(|record| record.get(self.channel))
        };

        let was_locked = self.controller.state().locked;
        let decision = self.controller.observe(measured);

        match decision {
            Decision::Correct {
                error_mhz,
                correction,
            } => self.apply(error_mhz, correction).await,
            Decision::OutOfCapture { error_mhz } => {
                debug!(line = %self.controller.line(), error_mhz, "Error outside capture range, holding");
            }
            Decision::Hold { error_mhz } if !was_locked => {
                info!(line = %self.controller.line(), error_mhz, "Line within deadband");
            }
            _ => {}
        }

        self.publish();
    }

    async fn apply(&mut self, error_mhz: f64, correction: f64) {
        let call = self.actuator.apply(self.controller.line(), correction);
        let result = match timeout(self.actuator_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ActuatorError::Timeout(self.actuator_timeout)),
        };

        match result {
            Ok(()) => {
                debug!(line = %self.controller.line(), error_mhz, correction, "Correction applied");
                self.controller.record_result(correction, Ok(()));
            }
            Err(e) => {
                // Logged once per fault episode, retried on every record
                if self.controller.status().last_fault.is_none() {
                    warn!(line = %self.controller.line(), correction, error = %e, "Actuator failed");
                } else {
                    debug!(line = %self.controller.line(), correction, error = %e, "Actuator still failing");
                }
                self.controller.record_result(correction, Err(e.to_string()));
            }
        }
    }

    fn publish(&self) -> LineStatus {
        let status = self.controller.status();
        self.status_tx.send_replace(status.clone());
        status
    }
}
