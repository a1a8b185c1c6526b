//! Multi-channel snapshots produced once per poll tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelIndex;
use crate::frequency::Frequency;

/// One channel's contribution to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReading {
    /// Channel this reading belongs to
    pub channel: ChannelIndex,

    /// Published value, `None` only if the channel has never produced one
    pub value: Option<Frequency>,

    /// False when `value` was held over from an earlier tick
    pub fresh: bool,
}

impl ChannelReading {
    /// A live reading taken on this tick.
    pub fn live(channel: ChannelIndex, value: Frequency) -> Self {
        Self {
            channel,
            value: Some(value),
            fresh: true,
        }
    }

    /// A reading that failed on this tick; `held` is the last known value.
    pub fn held(channel: ChannelIndex, held: Option<Frequency>) -> Self {
        Self {
            channel,
            value: held,
            fresh: false,
        }
    }
}

/// A consistent multi-channel reading captured at one poll instant.
///
/// Readings are stored in the fixed channel order established at startup.
/// A snapshot is immutable once built; it is shared between sessions
/// behind an `Arc` and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    seq: u64,
    captured_at: DateTime<Utc>,
    readings: Vec<ChannelReading>,
}

impl Snapshot {
    /// Creates a snapshot captured now.
    pub fn new(seq: u64, readings: Vec<ChannelReading>) -> Self {
        Self::with_timestamp(seq, Utc::now(), readings)
    }

    /// Creates a snapshot with an explicit capture time.
    pub fn with_timestamp(
        seq: u64,
        captured_at: DateTime<Utc>,
        readings: Vec<ChannelReading>,
    ) -> Self {
        Self {
            seq,
            captured_at,
            readings,
        }
    }

    /// Poll tick number, starting at 0.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Time the poll tick started.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Per-channel readings in publish order.
    pub fn readings(&self) -> &[ChannelReading] {
        &self.readings
    }

    /// Values in publish order.
    pub fn values(&self) -> impl Iterator<Item = Option<Frequency>> + '_ {
        self.readings.iter().map(|r| r.value)
    }

    /// Value for a given channel, if that channel is part of the snapshot.
    pub fn value(&self, channel: ChannelIndex) -> Option<Frequency> {
        self.readings
            .iter()
            .find(|r| r.channel == channel)
            .and_then(|r| r.value)
    }

    /// Number of channels in the snapshot.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Returns true if the snapshot has no channels.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Returns true if any channel failed to read on this tick.
    pub fn is_degraded(&self) -> bool {
        self.readings.iter().any(|r| !r.fresh)
    }

    /// Channels that failed to read on this tick.
    pub fn degraded_channels(&self) -> Vec<ChannelIndex> {
        self.readings
            .iter()
            .filter(|r| !r.fresh)
            .map(|r| r.channel)
            .collect()
    }
}
