//! Framed decoding of the telemetry stream.
//!
//! `RecordCodec` wraps `LinesCodec` so that a bad record surfaces as an
//! item (`Err(RecordError)`) instead of a stream error. `FramedRead`
//! terminates after the first decoder error, and a single malformed line
//! must not cost the client its connection.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::record::{Record, RecordError, MAX_RECORD_LEN};

/// Decoder producing one `Result<Record, RecordError>` per line.
///
/// The field count of the first valid record is remembered and every
/// later record must match it, because decoding is positional.
#[derive(Debug)]
pub struct RecordCodec {
    lines: LinesCodec,
    expected_fields: Option<usize>,
}

impl RecordCodec {
    /// Creates a codec that learns the field count from the first record.
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_RECORD_LEN),
            expected_fields: None,
        }
    }

    /// Creates a codec that only accepts records with `fields` fields.
    pub fn with_field_count(fields: usize) -> Self {
        Self {
            expected_fields: Some(fields),
            ..Self::new()
        }
    }

    /// Field count currently enforced, if known.
    pub fn expected_fields(&self) -> Option<usize> {
        self.expected_fields
    }

    fn accept(&mut self, line: &str) -> Result<Record, RecordError> {
        let record = Record::decode(line)?;

        match self.expected_fields {
            Some(expected) if expected != record.len() => Err(RecordError::FieldCount {
                expected,
                got: record.len(),
            }),
            Some(_) => Ok(record),
            None => {
                self.expected_fields = Some(record.len());
                Ok(record)
            }
        }
    }

    fn lift(
        &mut self,
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Result<Record, RecordError>>, io::Error> {
        match result {
            Ok(Some(line)) => Ok(Some(self.accept(&line))),
            Ok(None) => Ok(None),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(RecordError::TooLong {
                max: MAX_RECORD_LEN,
            }))),
            // LinesCodec consumes the offending line before validating UTF-8
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(RecordError::NotUtf8)))
            }
            Err(LinesCodecError::Io(e)) => Err(e),
        }
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RecordCodec {
    type Item = Result<Record, RecordError>;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let result = self.lines.decode(buf);
        self.lift(result)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let result = self.lines.decode_eof(buf);
        self.lift(result)
    }
}
