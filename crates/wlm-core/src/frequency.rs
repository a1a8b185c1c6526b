//! Fixed-point optical frequency value object.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DomainError, DomainResult};

/// An optical frequency.
///
/// Internally stored as an integer count of 0.01 MHz (10 kHz) steps, which
/// is also the unit used on the wire. One THz is 10^8 steps, so a visible
/// laser line around 700 THz needs eleven digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frequency {
    /// Frequency in units of 0.01 MHz
    units: i64,
}

impl Frequency {
    /// Wire units per THz.
    pub const UNITS_PER_THZ: f64 = 1e8;

    /// Wire units per MHz.
    pub const UNITS_PER_MHZ: f64 = 100.0;

    /// Creates a frequency from raw 0.01 MHz units.
    pub const fn from_units(units: i64) -> Self {
        Self { units }
    }

    /// Creates a frequency from a THz value, rounded to the nearest
    /// 0.01 MHz step.
    ///
    /// Rejects non-finite and non-positive values.
    pub fn from_thz(thz: f64) -> DomainResult<Self> {
        if !thz.is_finite() {
            return Err(DomainError::InvalidFrequency {
                value: thz,
                reason: "not a finite number",
            });
        }
        if thz <= 0.0 {
            return Err(DomainError::InvalidFrequency {
                value: thz,
                reason: "must be positive",
            });
        }

        let scaled = (thz * Self::UNITS_PER_THZ).round();
        if scaled >= i64::MAX as f64 {
            return Err(DomainError::InvalidFrequency {
                value: thz,
                reason: "out of range",
            });
        }

        Ok(Self {
            units: scaled as i64,
        })
    }

    /// Returns the raw 0.01 MHz units.
    pub const fn units(&self) -> i64 {
        self.units
    }

    /// Returns the frequency in THz.
    pub fn as_thz(&self) -> f64 {
        self.units as f64 / Self::UNITS_PER_THZ
    }

    /// Returns `self - other` in MHz.
    pub fn offset_mhz(&self, other: Frequency) -> f64 {
        self.units.saturating_sub(other.units) as f64 / Self::UNITS_PER_MHZ
    }

    /// Formats the value in THz with the given number of decimals.
    pub fn format_thz(&self, precision: usize) -> String {
        format!("{:.*} THz", precision, self.as_thz())
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_thz(8))
    }
}

impl FromStr for Frequency {
    type Err = DomainError;

    /// Parses a THz value such as `"710.96246"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let thz: f64 = s.trim().parse().map_err(|e: std::num::ParseFloatError| {
            DomainError::ParseError {
                field: "frequency".to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::from_thz(thz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_thz_rounds_to_wire_units() {
        let f = Frequency::from_thz(710.96242).unwrap();
        assert_eq!(f.units(), 71_096_242_000);
    }

    #[test]
    fn test_as_thz_round_trips_within_one_step() {
        let f = Frequency::from_thz(444.777).unwrap();
        assert!((f.as_thz() - 444.777).abs() < 1e-8);
    }

    #[test]
    fn test_from_thz_rejects_bad_values() {
        assert!(Frequency::from_thz(0.0).is_err());
        assert!(Frequency::from_thz(-1.0).is_err());
        assert!(Frequency::from_thz(f64::NAN).is_err());
        assert!(Frequency::from_thz(f64::INFINITY).is_err());
        assert!(Frequency::from_thz(1e30).is_err());
    }

    #[test]
    fn test_offset_mhz() {
        let target = Frequency::from_units(71_096_246_000);
        let measured = Frequency::from_units(71_096_242_000);
        // 4000 units of 0.01 MHz
        assert!((target.offset_mhz(measured) - 40.0).abs() < 1e-9);
        assert!((measured.offset_mhz(target) + 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_thz() {
        let f = Frequency::from_units(65_050_380_000);
        assert_eq!(f.format_thz(6), "650.503800 THz");
    }

    #[test]
    fn test_parse() {
        let f: Frequency = "274.589035".parse().unwrap();
        assert_eq!(f.units(), 27_458_903_500);
        assert!("abc".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_serde_transparent() {
        let f = Frequency::from_units(123);
        assert_eq!(serde_json::to_string(&f).unwrap(), "123");
    }
}
