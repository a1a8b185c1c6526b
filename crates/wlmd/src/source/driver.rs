//! Vendor meter driver loaded at runtime.
//!
//! The driver exports `GetFrequencyNum(channel, reserved) -> double`.
//! A positive result is the frequency in THz. Zero and negative results
//! are status codes.
//!
//! A call that outlives the poller's read timeout keeps running on its
//! blocking thread. Until it returns, further reads of that channel fail
//! fast instead of stacking up more blocked threads.

use std::collections::HashSet;
use std::os::raw::{c_double, c_long};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use libloading::Library;
use thiserror::Error;

use wlm_core::{ChannelIndex, Frequency};

use super::{MeasurementSource, SourceError};

type GetFrequencyNumFn = unsafe extern "system" fn(c_long, c_double) -> c_double;

const SYMBOL_GET_FREQUENCY: &[u8] = b"GetFrequencyNum\0";

// Status codes returned in place of a frequency
const ERR_NO_VALUE: i64 = 0;
const ERR_NO_SIGNAL: i64 = -1;
const ERR_BAD_SIGNAL: i64 = -2;
const ERR_LOW_SIGNAL: i64 = -3;
const ERR_BIG_SIGNAL: i64 = -4;
const ERR_WLM_MISSING: i64 = -5;
const ERR_NOT_AVAILABLE: i64 = -6;

/// Errors raised while loading the driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to load driver {path}: {error}")]
    Load { path: PathBuf, error: String },

    #[error("Driver {path} has no symbol {symbol}: {error}")]
    Symbol {
        path: PathBuf,
        symbol: &'static str,
        error: String,
    },
}

/// Loaded library together with the resolved entry point.
///
/// `get_frequency` stays valid for as long as `_lib` is alive, which is
/// the lifetime of this struct.
struct DriverLibrary {
    _lib: Library,
    get_frequency: GetFrequencyNumFn,
}

/// Channels with a driver call still running.
#[derive(Debug, Clone, Default)]
struct InFlight {
    channels: Arc<Mutex<HashSet<ChannelIndex>>>,
}

impl InFlight {
    /// Marks `channel` busy, or returns `None` if a call is already out.
    fn try_begin(&self, channel: ChannelIndex) -> Option<InFlightGuard> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.insert(channel).then(|| InFlightGuard {
            channels: Arc::clone(&self.channels),
            channel,
        })
    }
}

/// Clears the channel's busy mark on drop.
struct InFlightGuard {
    channels: Arc<Mutex<HashSet<ChannelIndex>>>,
    channel: ChannelIndex,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(&self.channel);
    }
}

/// Measurement source backed by the meter's vendor driver.
pub struct DriverSource {
    lib: Arc<DriverLibrary>,
    in_flight: InFlight,
}

impl DriverSource {
    /// Loads the driver library and resolves the frequency query.
    pub fn load(path: &Path) -> Result<Self, DriverError> {
        // SAFETY: loading runs the library's initialisers; the path comes
        // from operator configuration.
        let lib = unsafe { Library::new(path) }.map_err(|e| DriverError::Load {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        // SAFETY: the signature matches the vendor header. The raw function
        // pointer is stored next to the Library that owns it.
        let get_frequency = unsafe {
            let symbol = lib
                .get::<GetFrequencyNumFn>(SYMBOL_GET_FREQUENCY)
                .map_err(|e| DriverError::Symbol {
                    path: path.to_path_buf(),
                    symbol: "GetFrequencyNum",
                    error: e.to_string(),
                })?;
            *symbol
        };

        Ok(Self {
            lib: Arc::new(DriverLibrary {
                _lib: lib,
                get_frequency,
            }),
            in_flight: InFlight::default(),
        })
    }
}

#[async_trait]
impl MeasurementSource for DriverSource {
    fn name(&self) -> &str {
        "driver"
    }

    async fn read(&mut self, channel: ChannelIndex) -> Result<Frequency, SourceError> {
        let guard = self
            .in_flight
            .try_begin(channel)
            .ok_or_else(|| SourceError::ChannelUnavailable {
                channel,
                reason: "previous driver call still running".to_string(),
            })?;
        let lib = Arc::clone(&self.lib);
        let number = c_long::from(channel.driver_number());

        // The vendor call blocks; keep it off the runtime threads so the
        // caller's timeout can fire. The guard lives until the call returns,
        // even when the caller has stopped waiting.
        let raw = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            // SAFETY: the function pointer is valid while `lib` is alive.
            unsafe { (lib.get_frequency)(number, 0.0) }
        })
        .await
        .map_err(|e| SourceError::DriverUnavailable(format!("driver call aborted: {e}")))?;

        classify(channel, raw)
    }
}

/// Maps a raw driver result to a frequency or a source error.
fn classify(channel: ChannelIndex, raw: f64) -> Result<Frequency, SourceError> {
    if raw.is_finite() && raw > 0.0 {
        return Frequency::from_thz(raw).map_err(|e| SourceError::ChannelUnavailable {
            channel,
            reason: e.to_string(),
        });
    }

    let code = if raw.is_finite() { raw.round() as i64 } else { ERR_NO_VALUE };
    let reason = match code {
        ERR_WLM_MISSING => {
            return Err(SourceError::DriverUnavailable(
                "meter application is not running".to_string(),
            ))
        }
        ERR_NO_VALUE => "no value",
        ERR_NO_SIGNAL => "no signal",
        ERR_BAD_SIGNAL => "bad signal",
        ERR_LOW_SIGNAL => "underexposed",
        ERR_BIG_SIGNAL => "overexposed",
        ERR_NOT_AVAILABLE => "channel not available",
        _ => "unknown status",
    };

    Err(SourceError::ChannelUnavailable {
        channel,
        reason: format!("{reason} (code {code})"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch() -> ChannelIndex {
        ChannelIndex::new(0)
    }

    #[test]
    fn test_positive_value_is_thz() {
        let f = classify(ch(), 710.96242).unwrap();
        assert_eq!(f.units(), 71_096_242_000);
    }

    #[test]
    fn test_signal_codes_are_transient() {
        for code in [0.0, -1.0, -2.0, -3.0, -4.0, -6.0, -42.0] {
            let err = classify(ch(), code).unwrap_err();
            assert!(!err.is_fatal(), "code {code} should be transient");
        }
        let err = classify(ch(), -3.0).unwrap_err();
        assert!(err.to_string().contains("underexposed"));
    }

    #[test]
    fn test_missing_meter_is_fatal() {
        assert!(classify(ch(), -5.0).unwrap_err().is_fatal());
    }

    #[test]
    fn test_nan_is_transient() {
        assert!(!classify(ch(), f64::NAN).unwrap_err().is_fatal());
    }

    #[test]
    fn test_in_flight_channel_is_busy_until_released() {
        let in_flight = InFlight::default();
        let guard = in_flight.try_begin(ch()).unwrap();
        assert!(in_flight.try_begin(ch()).is_none());

        // Other channels are unaffected
        assert!(in_flight.try_begin(ChannelIndex::new(1)).is_some());

        drop(guard);
        assert!(in_flight.try_begin(ch()).is_some());
    }

    #[tokio::test]
    async fn test_timed_out_call_blocks_only_its_channel() {
        let in_flight = InFlight::default();
        let guard = in_flight.try_begin(ch()).unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        // Stand-in for a driver call that hangs past the read timeout
        let mut call = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let _ = release_rx.recv();
        });
        let waited = tokio::time::timeout(std::time::Duration::from_millis(20), &mut call).await;
        assert!(waited.is_err());

        // The caller gave up but the call is still out
        assert!(in_flight.try_begin(ch()).is_none());
        assert!(in_flight.try_begin(ChannelIndex::new(1)).is_some());

        release_tx.send(()).unwrap();
        call.await.unwrap();
        assert!(in_flight.try_begin(ch()).is_some());
    }

    #[test]
    fn test_load_missing_library() {
        let err = match DriverSource::load(Path::new("/nonexistent/libwlmData.so")) {
            Err(e) => e,
            Ok(_) => panic!("library should not load"),
        };
        assert!(matches!(err, DriverError::Load { .. }));
    }
}
