//! wlm daemon - wavelength-meter poller and telemetry broadcast server
//!
//! This crate provides the server side of the telemetry service:
//! - `source` - measurement sources (simulated walk, vendor driver)
//! - `poller` - periodic sampling into snapshots
//! - `hub` - session registry and non-blocking fan-out
//! - `server` - TCP accept loop
//! - `daemon` - wiring of the above into one process
//! - `config` - server configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        wlmd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │     Poller      │────▶│       BroadcastHub          │   │
//! │  │ (owns source)   │     │  (per-session bounded queue)│   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │ try_send         │
//! │  ┌─────────────────┐                    ▼                  │
//! │  │ TelemetryServer │     ┌─────────────────────────────┐   │
//! │  │  (TcpListener)  │────▶│    Session (per client)     │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate is panic-free:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod daemon;
pub mod hub;
pub mod poller;
pub mod server;
pub mod source;

pub use config::{ConfigError, ServerConfig};
pub use daemon::{Daemon, DaemonError};
pub use hub::{BroadcastHub, CloseReason, HubConfig, PublishReport, Session, SessionId};
pub use poller::{spawn_poller, Poller, PollerError};
pub use server::{ServerError, TelemetryServer};
pub use source::{open_source, MeasurementSource, SimulatedSource, SourceError};
