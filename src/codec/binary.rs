//! Binary record layout.
//!
//! ```text
//!  31      27 26   24 23                                     0
//! +----------+-------+----------------------------------------+
//! |  flags   | n - 1 |  type[7] ... type[1] type[0] (3 bits)   |
//! +----------+-------+----------------------------------------+
//! [ priority: i8 ]        if FLAG_PRIORITY
//! [ time_ms: u32 BE ]     if FLAG_TIME
//! value[0] .. value[n-1]
//! ```
//!
//! The header is a big-endian `u32`. Absent priority means 0, absent time
//! means "not scheduled". Reserved flag bits must be zero.

use crate::codec::{CodecError, CodecResult};
use crate::data::record::check_priority;
use crate::data::{Record, Value, ValueType, DEFAULT_PRIORITY, MAX_FIELDS};
use std::io::{Read, Write};

/// A priority byte follows the header.
pub const FLAG_PRIORITY: u8 = 0b00001;
/// A 4-byte scheduled time follows the header (and priority byte).
pub const FLAG_TIME: u8 = 0b00010;

const KNOWN_FLAGS: u8 = FLAG_PRIORITY | FLAG_TIME;
const FLAGS_SHIFT: u32 = 27;
const COUNT_SHIFT: u32 = 24;
const TYPE_BITS: u32 = 3;
const TYPE_MASK: u32 = 0b111;

/// Build the 32-bit header word for a record.
pub fn encode_header(record: &Record) -> CodecResult<u32> {
    let count = record.len();
    if count == 0 || count > MAX_FIELDS {
        return Err(CodecError::FieldCount(count));
    }

    let mut flags = 0u8;
    if record.priority() != DEFAULT_PRIORITY {
        flags |= FLAG_PRIORITY;
    }
    if record.time_ms().is_some() {
        flags |= FLAG_TIME;
    }

    let mut header = (flags as u32) << FLAGS_SHIFT | ((count - 1) as u32) << COUNT_SHIFT;
    for (i, value) in record.values().iter().enumerate() {
        header |= (value.value_type().id() as u32) << (i as u32 * TYPE_BITS);
    }
    Ok(header)
}

/// Encode a record into a fresh buffer.
pub fn encode(record: &Record) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(16);
    write_record(record, &mut buf)?;
    Ok(buf)
}

/// Decode exactly one record from a byte slice.
pub fn decode(bytes: &[u8]) -> CodecResult<Record> {
    let mut cursor = bytes;
    read_record(&mut cursor)?.ok_or(CodecError::Truncated)
}

pub fn write_record<W: Write>(record: &Record, output: &mut W) -> CodecResult<()> {
    let header = encode_header(record)?;
    // Assemble in memory so a value that fails to encode leaves the stream untouched.
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&header.to_be_bytes());
    if record.priority() != DEFAULT_PRIORITY {
        buf.push(record.priority() as u8);
    }
    if let Some(time) = record.time_ms() {
        buf.extend_from_slice(&time.to_be_bytes());
    }
    for value in record.values() {
        value.write_binary(&mut buf)?;
    }
    output.write_all(&buf)?;
    Ok(())
}

/// Read one record. Returns `Ok(None)` when the stream ends cleanly before a
/// header starts.
pub fn read_record<R: Read>(input: &mut R) -> CodecResult<Option<Record>> {
    let mut header_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < header_bytes.len() {
        match input.read(&mut header_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(CodecError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    let header = u32::from_be_bytes(header_bytes);

    let flags = (header >> FLAGS_SHIFT) as u8;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(CodecError::ReservedFlags(flags));
    }
    let count = ((header >> COUNT_SHIFT) & 0b111) as usize + 1;

    let mut priority = DEFAULT_PRIORITY as i32;
    if flags & FLAG_PRIORITY != 0 {
        let mut b = [0u8; 1];
        input.read_exact(&mut b).map_err(CodecError::from_read)?;
        priority = b[0] as i8 as i32;
        check_priority(priority).map_err(|_| CodecError::PriorityOutOfRange(priority))?;
    }

    let mut time = None;
    if flags & FLAG_TIME != 0 {
        let mut b = [0u8; 4];
        input.read_exact(&mut b).map_err(CodecError::from_read)?;
        time = Some(u32::from_be_bytes(b));
    }

    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let id = ((header >> (i as u32 * TYPE_BITS)) & TYPE_MASK) as u8;
        // every 3-bit id names a type
        let ty = ValueType::from_id(id).ok_or(CodecError::InvalidNumber(id.to_string()))?;
        values.push(Value::read_binary(ty, input)?);
    }

    let mut record = Record::new(values)?.with_priority(priority)?;
    if let Some(time) = time {
        record = record.with_time(time);
    }
    Ok(Some(record))
}
