//! Periodic sampling of the measurement source.
//!
//! The Poller is the only owner of the [`MeasurementSource`]. Each tick it
//! reads every enabled channel, builds one [`Snapshot`] and hands it to the
//! [`BroadcastHub`]. A channel that fails to read keeps its previous value
//! and the snapshot is marked degraded; a channel that has never produced a
//! value is published as absent.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` or slice indexing
//! - A fatal source error ends the task with `Err`, it never panics

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wlm_core::{ChannelIndex, ChannelReading, Frequency, Snapshot};

use crate::hub::BroadcastHub;
use crate::source::{MeasurementSource, SourceError};

/// Decimals used for THz values in log output by default.
const DEFAULT_LOG_PRECISION: usize = 11;

/// Errors that stop the Poller.
#[derive(Debug, Error)]
pub enum PollerError {
    #[error("Measurement source '{name}' lost: {reason}")]
    SourceLost { name: String, reason: String },
}

/// Per-channel bookkeeping across ticks.
#[derive(Debug)]
struct ChannelState {
    index: ChannelIndex,
    last: Option<Frequency>,
    degraded: bool,
}

/// Samples a measurement source into snapshots.
pub struct Poller {
    source: Box<dyn MeasurementSource>,
    channels: Vec<ChannelState>,
    read_timeout: Duration,
    precision: usize,
    seq: u64,
}

impl Poller {
    /// Creates a poller over the given channels, in publish order.
    pub fn new(
        source: Box<dyn MeasurementSource>,
        channels: impl IntoIterator<Item = ChannelIndex>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            source,
            channels: channels
                .into_iter()
                .map(|index| ChannelState {
                    index,
                    last: None,
                    degraded: false,
                })
                .collect(),
            read_timeout,
            precision: DEFAULT_LOG_PRECISION,
            seq: 0,
        }
    }

    /// Sets the number of decimals used for THz values in logs.
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Number of channels in every snapshot.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Reads all channels once and returns the resulting snapshot.
    ///
    /// Per-channel failures (including read timeouts) are absorbed by
    /// holding the last value. Only a fatal source error is returned.
    pub async fn poll_once(&mut self) -> Result<Snapshot, PollerError> {
        let captured_at = Utc::now();
        let mut readings = Vec::with_capacity(self.channels.len());

        for state in self.channels.iter_mut() {
            let channel = state.index;
            let result = match timeout(self.read_timeout, self.source.read(channel)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::ChannelUnavailable {
                    channel,
                    reason: format!("read timed out after {:?}", self.read_timeout),
                }),
            };

            match result {
                Ok(value) => {
                    if state.degraded {
                        info!(
                            channel = %channel,
                            value = %value.format_thz(self.precision),
                            "Channel recovered"
                        );
                    }
                    state.degraded = false;
                    state.last = Some(value);
                    readings.push(ChannelReading::live(channel, value));
                }
                Err(e) if e.is_fatal() => {
                    error!(source = self.source.name(), error = %e, "Measurement source lost");
                    return Err(PollerError::SourceLost {
                        name: self.source.name().to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    if !state.degraded {
                        warn!(
                            channel = %channel,
                            error = %e,
                            held = state.last.is_some(),
                            "Channel unavailable, holding last value"
                        );
                    }
                    state.degraded = true;
                    readings.push(ChannelReading::held(channel, state.last));
                }
            }
        }

        let snapshot = Snapshot::with_timestamp(self.seq, captured_at, readings);
        self.seq = self.seq.wrapping_add(1);
        Ok(snapshot)
    }

    /// Runs the poll loop until cancelled or the source is lost.
    ///
    /// Publishes exactly one snapshot per tick. Returns `Ok(())` on
    /// cancellation.
    pub async fn run(
        mut self,
        hub: BroadcastHub,
        period: Duration,
        cancel: CancellationToken,
    ) -> Result<(), PollerError> {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            source = self.source.name(),
            channels = self.channels.len(),
            period_ms = period.as_millis() as u64,
            "Poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Poller shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let snapshot = self.poll_once().await?;
                    let seq = snapshot.seq();
                    let degraded = snapshot.is_degraded();
                    let report = hub.publish(Arc::new(snapshot)).await;
                    debug!(
                        seq,
                        degraded,
                        delivered = report.delivered,
                        dropped = report.dropped,
                        "Published snapshot"
                    );
                }
            }
        }

        debug!("Poller task completed");
        Ok(())
    }
}

/// Spawns the poll loop as a task.
///
/// The task resolves to `Err` only if the measurement source is lost.
pub fn spawn_poller(
    poller: Poller,
    hub: BroadcastHub,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), PollerError>> {
    tokio::spawn(poller.run(hub, period, cancel))
}
