//! Record encoding and positional decoding.

use thiserror::Error;
use wlm_core::{Frequency, Snapshot};

/// Separator between fields of a record.
pub const FIELD_DELIMITER: char = ',';

/// Upper bound on a single record, terminator excluded.
///
/// Eight channels of eleven digits need well under 100 bytes; anything
/// near this limit is a desynchronised stream.
pub const MAX_RECORD_LEN: usize = 1024;

/// Longest digit run accepted in one field (i64 holds 18 safely).
const MAX_FIELD_DIGITS: usize = 18;

/// One decoded telemetry record.
///
/// Holds the per-channel values in wire order. `None` marks a channel
/// that has not reported yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    values: Vec<Option<Frequency>>,
}

impl Record {
    /// Creates a record from values in wire order.
    pub fn new(values: Vec<Option<Frequency>>) -> Self {
        Self { values }
    }

    /// Builds the record published for a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self::new(snapshot.values().collect())
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a field position; `None` if absent or out of range.
    pub fn get(&self, position: usize) -> Option<Frequency> {
        self.values.get(position).copied().flatten()
    }

    /// All values in wire order.
    pub fn values(&self) -> &[Option<Frequency>] {
        &self.values
    }

    /// Encodes the record, including the trailing line break.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.values.len() * 12 + 1);
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                out.push(FIELD_DELIMITER);
            }
            if let Some(f) = value {
                out.push_str(&f.units().to_string());
            }
        }
        out.push('\n');
        out
    }

    /// Decodes one record from a line with the terminator already removed.
    ///
    /// A trailing `\r` is tolerated. Fields must be unsigned decimal
    /// integers or empty; zero is rejected because a real frequency is
    /// never zero. A blank line is a single absent field, which is how a
    /// one-channel snapshot without a value is sent.
    pub fn decode(line: &str) -> Result<Self, RecordError> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.len() > MAX_RECORD_LEN {
            return Err(RecordError::TooLong {
                max: MAX_RECORD_LEN,
            });
        }

        let values = line
            .split(FIELD_DELIMITER)
            .enumerate()
            .map(|(position, field)| decode_field(position, field))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { values })
    }
}

fn decode_field(position: usize, field: &str) -> Result<Option<Frequency>, RecordError> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }

    let invalid = |reason: &'static str| RecordError::InvalidField {
        position,
        field: field.chars().take(32).collect(),
        reason,
    };

    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("not an unsigned integer"));
    }
    if field.len() > MAX_FIELD_DIGITS {
        return Err(invalid("too many digits"));
    }

    let units: i64 = field.parse().map_err(|_| invalid("not an unsigned integer"))?;
    if units == 0 {
        return Err(invalid("zero frequency"));
    }

    Ok(Some(Frequency::from_units(units)))
}

/// Reasons a record is rejected.
///
/// All of these are per-record faults: the stream itself stays usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record exceeds {max} bytes")]
    TooLong { max: usize },

    #[error("Record is not valid UTF-8")]
    NotUtf8,

    #[error("Invalid field {position} ({field:?}): {reason}")]
    InvalidField {
        position: usize,
        field: String,
        reason: &'static str,
    },

    #[error("Expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },
}
