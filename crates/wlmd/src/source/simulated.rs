use std::collections::HashMap;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use wlm_core::{ChannelIndex, Frequency};

use super::{MeasurementSource, SourceError};

/// Base frequencies (THz) of the simulated channels.
///
/// The first four are the cooling, ionization, repumper and clock lines.
/// Channels past the end of the table reuse its last entry.
const BASE_THZ: [f64; 8] = [
    710.962460, 650.503800, 274.589035, 444.777000, 434.947000, 441.334000, 423.914000, 325.252000,
];

/// Largest step of the walk per read, in 0.01 MHz units (2 MHz).
const MAX_STEP_UNITS: i64 = 200;

/// Fraction of the distance to the base value removed per read.
const REVERSION: f64 = 0.05;

/// Per-channel walk state.
#[derive(Debug)]
struct Walk {
    rng: StdRng,
    base: i64,
    current: i64,
}

impl Walk {
    fn new(seed: u64, channel: ChannelIndex) -> Self {
        let slot = (channel.get() as usize).min(BASE_THZ.len() - 1);
        let base = (BASE_THZ[slot] * Frequency::UNITS_PER_THZ).round() as i64;
        Self {
            rng: StdRng::seed_from_u64(seed.wrapping_add(channel.get() as u64)),
            base,
            current: base,
        }
    }

    fn step(&mut self) -> i64 {
        let pull = ((self.base - self.current) as f64 * REVERSION).round() as i64;
        let jitter = self.rng.gen_range(-MAX_STEP_UNITS..=MAX_STEP_UNITS);
        self.current = (self.current + pull + jitter).max(1);
        self.current
    }
}

/// Deterministic synthetic meter used in debug mode.
///
/// Each channel follows a mean-reverting random walk around its base
/// frequency. The walk of a channel depends only on the seed and the
/// channel index, so two sources with the same seed produce identical
/// sequences.
#[derive(Debug)]
pub struct SimulatedSource {
    seed: u64,
    walks: HashMap<ChannelIndex, Walk>,
}

impl SimulatedSource {
    /// Creates a simulated source.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            walks: HashMap::new(),
        }
    }
}

#[async_trait]
impl MeasurementSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn read(&mut self, channel: ChannelIndex) -> Result<Frequency, SourceError> {
        let seed = self.seed;
        let units = self
            .walks
            .entry(channel)
            .or_insert_with(|| Walk::new(seed, channel))
            .step();
        Ok(Frequency::from_units(units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sample(source: &mut SimulatedSource, channel: u32, n: usize) -> Vec<Frequency> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(source.read(ChannelIndex::new(channel)).await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_same_seed_same_sequence() {
        let mut a = SimulatedSource::new(42);
        let mut b = SimulatedSource::new(42);
        assert_eq!(sample(&mut a, 0, 20).await, sample(&mut b, 0, 20).await);
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let mut a = SimulatedSource::new(7);
        let mut b = SimulatedSource::new(7);

        // Interleaving reads of another channel must not change channel 1
        let _ = sample(&mut a, 0, 5).await;
        let seq_a = sample(&mut a, 1, 10).await;
        let seq_b = sample(&mut b, 1, 10).await;
        assert_eq!(seq_a, seq_b);
    }

    #[tokio::test]
    async fn test_walk_stays_near_base() {
        let mut source = SimulatedSource::new(1);
        let base = Frequency::from_thz(BASE_THZ[0]).unwrap();
        for f in sample(&mut source, 0, 2000).await {
            // Mean reversion keeps the walk within a few tens of MHz
            assert!(f.offset_mhz(base).abs() < 100.0, "drifted to {f}");
        }
    }

    #[tokio::test]
    async fn test_channel_past_table_uses_last_base() {
        let mut source = SimulatedSource::new(3);
        let f = source.read(ChannelIndex::new(20)).await.unwrap();
        let base = Frequency::from_thz(BASE_THZ[7]).unwrap();
        assert!(f.offset_mhz(base).abs() < 10.0);
    }
}
