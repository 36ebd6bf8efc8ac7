//! Wire codecs for records.
//!
//! Two interchangeable encodings are supported:
//!
//! - [`binary`]: compact, bitfield-prefixed, big-endian layout.
//! - [`ascii`]: one human-readable, `|`-separated line per record.
//!
//! [`WireFormat`] selects one of them at runtime for stream-based inputs and
//! outputs.

pub mod ascii;
pub mod binary;

use crate::data::{Record, RecordError};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use thiserror::Error;

/// Format errors. Each one is fatal to the single record being parsed.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Stream ended in the middle of a record")]
    Truncated,

    #[error("Reserved header flags set: {0:#07b}")]
    ReservedFlags(u8),

    #[error("Priority {0} out of range")]
    PriorityOutOfRange(i32),

    #[error("Record with {0} fields cannot be encoded")]
    FieldCount(usize),

    #[error("Length {0} out of range")]
    LengthOutOfRange(usize),

    #[error("Invalid hex digits")]
    InvalidHex,

    #[error("Invalid UTF-8 text")]
    InvalidUtf8,

    #[error("String contains a NUL byte")]
    InteriorNul,

    #[error("Invalid number: {0:?}")]
    InvalidNumber(String),

    #[error("Invalid byte 0x{byte:02X} at column {column}")]
    InvalidByte { byte: u8, column: usize },

    #[error("Flag section is not terminated by ']'")]
    UnterminatedFlags,

    #[error("Invalid flag section: {0}")]
    InvalidFlag(String),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Map a `read_exact` failure: a short read is a truncated record.
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::Truncated
        } else {
            CodecError::Io(err)
        }
    }

    /// Whether the reader can continue with the next record after this error.
    ///
    /// ASCII framing is line based, so a malformed line never poisons the
    /// following one. Binary framing has no resync point.
    pub fn is_recoverable(&self, format: WireFormat) -> bool {
        match self {
            CodecError::Io(_) => false,
            _ => format == WireFormat::Ascii,
        }
    }
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Selects the record encoding used by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Ascii,
    Binary,
}

impl WireFormat {
    /// Read the next record, `Ok(None)` on a clean end of stream.
    pub fn read_record<R: BufRead>(self, input: &mut R) -> CodecResult<Option<Record>> {
        match self {
            WireFormat::Ascii => ascii::read_record(input),
            WireFormat::Binary => binary::read_record(input),
        }
    }

    pub fn write_record<W: Write>(self, record: &Record, output: &mut W) -> CodecResult<()> {
        match self {
            WireFormat::Ascii => ascii::write_record(record, output),
            WireFormat::Binary => binary::write_record(record, output),
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Ascii => write!(f, "ascii"),
            WireFormat::Binary => write!(f, "binary"),
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" | "text" => Ok(WireFormat::Ascii),
            "binary" | "bin" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format '{}'", other)),
        }
    }
}
