//! Line task commands and errors.
//!
//! Operator requests reach a line task as `LineCommand`s. Every command
//! answers with the line's status after the command was applied, so the
//! caller always sees the effect of its own request.

use thiserror::Error;
use tokio::sync::oneshot;

use wlm_core::Frequency;

use crate::controller::LineStatus;

/// Commands sent to a line task.
#[derive(Debug)]
pub enum LineCommand {
    /// Operator toggle between `Unlocked` (false) and `Locked` (true).
    SetEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<LineStatus>,
    },

    /// Replace the target frequency.
    SetTarget {
        target: Frequency,
        respond_to: oneshot::Sender<LineStatus>,
    },

    /// Forget the measurement and any actuator fault.
    Reset {
        respond_to: oneshot::Sender<LineStatus>,
    },

    /// Read the current status.
    Status {
        respond_to: oneshot::Sender<LineStatus>,
    },
}

/// Errors returned by a line handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    /// The line task has stopped.
    #[error("Line task closed")]
    ChannelClosed,
}
