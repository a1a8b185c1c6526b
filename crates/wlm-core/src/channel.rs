//! Measurement channels of the wavelength meter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-based index of a meter input channel.
///
/// The meter driver numbers its inputs from 1; conversion happens at the
/// driver boundary via [`ChannelIndex::driver_number`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelIndex(u32);

impl ChannelIndex {
    /// Creates a channel index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the zero-based index.
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns the one-based number used by the meter driver.
    pub const fn driver_number(&self) -> i32 {
        // Configured indices are tiny; saturate rather than wrap.
        if self.0 >= i32::MAX as u32 {
            i32::MAX
        } else {
            self.0 as i32 + 1
        }
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A configured meter channel.
///
/// The set of channels is fixed at configuration time and never changes
/// while the server runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Zero-based channel index
    pub index: ChannelIndex,

    /// Human-readable label
    pub label: String,

    /// Whether the channel is sampled and published
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Channel {
    /// Creates an enabled channel.
    pub fn new(index: u32, label: impl Into<String>) -> Self {
        Self {
            index: ChannelIndex::new(index),
            label: label.into(),
            enabled: true,
        }
    }

    /// Returns the default channel list: `count` enabled channels labelled
    /// `Channel 1`, `Channel 2`, ...
    pub fn defaults(count: u32) -> Vec<Channel> {
        (0..count)
            .map(|i| Channel::new(i, format!("Channel {}", i.saturating_add(1))))
            .collect()
    }
}
