//! wlm lock client - telemetry ingestion and per-line laser frequency lock
//!
//! This crate provides the client side of the telemetry service:
//! - `client` - connection to the server, reconnect with backoff
//! - `controller` - per-line lock state machine and correction law
//! - `line` - one task per line driving its actuator
//! - `actuator` - actuator trait and simulated implementation
//! - `targets` - persisted target frequencies
//! - `console` - operator command parsing
//! - `service` - wiring of the above
//!
//! # Architecture
//!
//! ```text
//!   TCP stream                 watch<LatestRecord>
//!  ────────────▶ IngestionClient ─────────┬──────────────┬─────────────┐
//!                                         ▼              ▼             ▼
//!                                    LineTask       LineTask      LineTask
//!                                   (cooling)     (ionization)     (...)
//!                                         │              │             │
//!                                         └──────┬───────┴─────────────┘
//!                                                ▼
//!                                            Actuator
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate is panic-free:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod actuator;
pub mod client;
pub mod config;
pub mod console;
pub mod controller;
pub mod line;
pub mod service;
pub mod targets;

pub use actuator::{Actuator, ActuatorError, SimulatedActuator};
pub use client::{ClientConfig, ClientError, ConnectionState, ConnectionStatus, IngestionClient};
pub use config::{ConfigError, LineConfig, LockConfig};
pub use console::{ConsoleCommand, ConsoleError, LineSelector};
pub use controller::{CorrectionPolicy, Decision, LineStatus, LockController, LockMode, LockState};
pub use line::{spawn_line, LineError, LineHandle};
pub use service::{LockService, Outcome, ServiceError};
pub use targets::{TargetStore, TargetStoreError};
