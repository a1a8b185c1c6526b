//! Measurement sources.
//!
//! A [`MeasurementSource`] returns one frequency per channel on demand.
//! The Poller owns exactly one source for the lifetime of the process and
//! is the only caller, so implementations may keep mutable state without
//! any locking.
//!
//! Two implementations exist:
//! - [`SimulatedSource`] - deterministic pseudo-random walk (debug mode)
//! - [`DriverSource`] - the meter's vendor driver, loaded at runtime

mod driver;
mod simulated;

pub use driver::{DriverError, DriverSource};
pub use simulated::SimulatedSource;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use wlm_core::{ChannelIndex, Frequency};

use crate::config::ServerConfig;

/// Produces frequency samples for meter channels.
#[async_trait]
pub trait MeasurementSource: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Reads the current frequency of one channel.
    ///
    /// [`SourceError::ChannelUnavailable`] is a per-channel fault the
    /// caller recovers from. [`SourceError::DriverUnavailable`] means the
    /// whole source is gone.
    async fn read(&mut self, channel: ChannelIndex) -> Result<Frequency, SourceError>;
}

/// Errors reported by a measurement source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("Channel {channel} unavailable: {reason}")]
    ChannelUnavailable {
        channel: ChannelIndex,
        reason: String,
    },

    #[error("Measurement source unavailable: {0}")]
    DriverUnavailable(String),
}

impl SourceError {
    /// Returns true if the source as a whole can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DriverUnavailable(_))
    }
}

/// Opens the measurement source selected by the configuration.
///
/// Failing to load the driver is fatal; there is no silent fallback to
/// simulation.
pub fn open_source(config: &ServerConfig) -> Result<Box<dyn MeasurementSource>, SourceError> {
    if config.debug {
        info!(seed = config.simulation_seed, "Using simulated measurement source");
        return Ok(Box::new(SimulatedSource::new(config.simulation_seed)));
    }

    let source = DriverSource::load(&config.driver_path)
        .map_err(|e| SourceError::DriverUnavailable(e.to_string()))?;
    info!(path = %config.driver_path.display(), "Loaded meter driver");
    Ok(Box::new(source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_fatal_classification() {
        assert!(SourceError::DriverUnavailable("gone".into()).is_fatal());
        assert!(!SourceError::ChannelUnavailable {
            channel: ChannelIndex::new(1),
            reason: "no signal".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_open_simulated_source() {
        let config = ServerConfig {
            debug: true,
            ..Default::default()
        };
        let source = open_source(&config).unwrap();
        assert_eq!(source.name(), "simulated");
    }

    #[test]
    fn test_missing_driver_is_fatal() {
        let config = ServerConfig {
            debug: false,
            driver_path: PathBuf::from("/nonexistent/libwlmData.so"),
            ..Default::default()
        };
        let err = match open_source(&config) {
            Err(e) => e,
            Ok(_) => panic!("driver should not load"),
        };
        assert!(err.is_fatal());
    }
}
