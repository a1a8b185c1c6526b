//! wlm Protocol - Wire format of the telemetry stream
//!
//! The server writes one record per poll tick and the client decodes
//! them positionally. There is no handshake: the first record follows
//! the TCP accept immediately.
//!
//! ```text
//! 71096242000,65050380000,,44477700000\n
//! ```
//!
//! Each field is a frequency in units of 0.01 MHz. Fields keep the fixed
//! channel order established when the server starts; an empty field marks
//! a channel that has never produced a value.

pub mod codec;
pub mod record;

pub use codec::RecordCodec;
pub use record::{Record, RecordError, FIELD_DELIMITER, MAX_RECORD_LEN};
