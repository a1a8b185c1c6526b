//! Client interface for a line task.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `LineError::ChannelClosed`

use tokio::sync::{mpsc, oneshot, watch};

use wlm_core::{Frequency, LineName};

use super::commands::{LineCommand, LineError};
use crate::controller::LineStatus;

/// Cheap-to-clone handle for one line task.
#[derive(Clone)]
pub struct LineHandle {
    /// Line this handle controls
    line: LineName,

    /// Command sender to the task
    sender: mpsc::Sender<LineCommand>,

    /// Status published after every change
    status: watch::Receiver<LineStatus>,
}

impl LineHandle {
    pub(super) fn new(
        line: LineName,
        sender: mpsc::Sender<LineCommand>,
        status: watch::Receiver<LineStatus>,
    ) -> Self {
        Self {
            line,
            sender,
            status,
        }
    }

    pub fn line(&self) -> &LineName {
        &self.line
    }

    /// Switches the line between `Unlocked` and `Locked`.
    ///
    /// # Errors
    ///
    /// - `LineError::ChannelClosed` if the task has stopped
    pub async fn set_enabled(&self, enabled: bool) -> Result<LineStatus, LineError> {
        self.request(|respond_to| LineCommand::SetEnabled {
            enabled,
            respond_to,
        })
        .await
    }

    /// Replaces the line's target.
    ///
    /// # Errors
    ///
    /// - `LineError::ChannelClosed` if the task has stopped
    pub async fn set_target(&self, target: Frequency) -> Result<LineStatus, LineError> {
        self.request(|respond_to| LineCommand::SetTarget { target, respond_to })
            .await
    }

    /// Clears the measurement and any fault.
    ///
    /// # Errors
    ///
    /// - `LineError::ChannelClosed` if the task has stopped
    pub async fn reset(&self) -> Result<LineStatus, LineError> {
        self.request(|respond_to| LineCommand::Reset { respond_to })
            .await
    }

    /// Current status, answered by the task itself.
    ///
    /// # Errors
    ///
    /// - `LineError::ChannelClosed` if the task has stopped
    pub async fn status(&self) -> Result<LineStatus, LineError> {
        self.request(|respond_to| LineCommand::Status { respond_to })
            .await
    }

    /// Last published status. Also readable after the task stopped.
    pub fn latest(&self) -> LineStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn watch(&self) -> watch::Receiver<LineStatus> {
        self.status.clone()
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<LineStatus>) -> LineCommand,
    ) -> Result<LineStatus, LineError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(command(tx))
            .await
            .map_err(|_| LineError::ChannelClosed)?;

        rx.await.map_err(|_| LineError::ChannelClosed)
    }
}
