//! wlm Core - Shared types for wavelength-meter telemetry
//!
//! This crate provides the domain types shared between the telemetry
//! server (wlmd) and the lock client (wlm-lock).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod channel;
pub mod error;
pub mod frequency;
pub mod line;
pub mod snapshot;

// Re-exports for convenience
pub use channel::{Channel, ChannelIndex};
pub use error::{DomainError, DomainResult};
pub use frequency::Frequency;
pub use line::LineName;
pub use snapshot::{ChannelReading, Snapshot};
