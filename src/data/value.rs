//! Typed scalar fields carried inside a [`Record`](crate::data::Record).
//!
//! Every [`Value`] knows its own binary and ASCII representation. The binary
//! forms are big-endian and self-delimiting so a record can be decoded field by
//! field without any side table:
//!
//! | Type       | Id | Binary form                              |
//! |------------|----|------------------------------------------|
//! | `Int8`     | 0  | 1 signed byte                            |
//! | `Int32`    | 1  | 4 bytes                                  |
//! | `Int64`    | 2  | 8 bytes                                  |
//! | `Float32`  | 3  | 4 bytes IEEE-754                         |
//! | `Float64`  | 4  | 8 bytes IEEE-754                         |
//! | `Utf`      | 5  | u16 byte length + UTF-8 bytes            |
//! | `NullTerm` | 6  | UTF-8 bytes + `0x00`                     |
//! | `Binary`   | 7  | u32 byte length + raw bytes              |

use crate::codec::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use thiserror::Error;

/// Upper bound for a length-prefixed binary blob (16 MiB).
pub const MAX_BINARY_LEN: usize = 16 * 1024 * 1024;

/// Upper bound for a null-terminated string read from a stream.
pub const MAX_STRING_LEN: usize = 1024 * 1024;

/// Error raised when a value cannot be coerced to the requested scalar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot read {from} value as {to}")]
pub struct ValueError {
    pub from: ValueType,
    pub to: &'static str,
}

pub type ValueResult<T> = std::result::Result<T, ValueError>;

/// Wire type of a value. The discriminant is the 3-bit id used in the binary
/// record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    Int8 = 0,
    Int32 = 1,
    Int64 = 2,
    Float32 = 3,
    Float64 = 4,
    Utf = 5,
    NullTerm = 6,
    Binary = 7,
}

impl ValueType {
    pub const ALL: [ValueType; 8] = [
        ValueType::Int8,
        ValueType::Int32,
        ValueType::Int64,
        ValueType::Float32,
        ValueType::Float64,
        ValueType::Utf,
        ValueType::NullTerm,
        ValueType::Binary,
    ];

    /// 3-bit id stored in the binary header.
    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// The ASCII family letter (`I`, `F`, `S` or `B`).
    pub fn family_char(self) -> char {
        match self {
            ValueType::Int8 | ValueType::Int32 | ValueType::Int64 => 'I',
            ValueType::Float32 | ValueType::Float64 => 'F',
            ValueType::Utf | ValueType::NullTerm => 'S',
            ValueType::Binary => 'B',
        }
    }

    /// Widest type of the family named by an ASCII type letter.
    pub fn detect_from_type_char(c: char) -> Option<Self> {
        match c {
            'I' => Some(ValueType::Int64),
            'F' => Some(ValueType::Float64),
            'S' => Some(ValueType::NullTerm),
            'B' => Some(ValueType::Binary),
            _ => None,
        }
    }

    /// The type a value of this type becomes after an ASCII round trip.
    pub fn canonical(self) -> Self {
        // family_char always yields one of the four known letters
        Self::detect_from_type_char(self.family_char()).unwrap_or(self)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Int8 => "int8",
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::Float32 => "float32",
            ValueType::Float64 => "float64",
            ValueType::Utf => "utf",
            ValueType::NullTerm => "string",
            ValueType::Binary => "binary",
        };
        f.write_str(name)
    }
}

/// A single typed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int8(i8),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Utf(String),
    NullTerm(String),
    Binary(Vec<u8>),
}

impl Value {
    /// Zero / empty value of the given type, ready to be filled by a caller.
    pub fn create_for_type(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Int8 => Value::Int8(0),
            ValueType::Int32 => Value::Int32(0),
            ValueType::Int64 => Value::Int64(0),
            ValueType::Float32 => Value::Float32(0.0),
            ValueType::Float64 => Value::Float64(0.0),
            ValueType::Utf => Value::Utf(String::new()),
            ValueType::NullTerm => Value::NullTerm(String::new()),
            ValueType::Binary => Value::Binary(Vec::new()),
        }
    }

    /// Build a value of `value_type` from another value, coercing as needed.
    ///
    /// Integer targets are range checked; a value that does not fit is a
    /// coercion error rather than a silent truncation.
    pub fn coerce(value_type: ValueType, from: &Value) -> ValueResult<Self> {
        let err = |to| ValueError {
            from: from.value_type(),
            to,
        };
        Ok(match value_type {
            ValueType::Int8 => Value::Int8(i8::try_from(from.as_long()?).map_err(|_| err("int8"))?),
            ValueType::Int32 => {
                Value::Int32(i32::try_from(from.as_long()?).map_err(|_| err("int32"))?)
            }
            ValueType::Int64 => Value::Int64(from.as_long()?),
            ValueType::Float32 => Value::Float32(from.as_double()? as f32),
            ValueType::Float64 => Value::Float64(from.as_double()?),
            ValueType::Utf => Value::Utf(from.as_string()?),
            ValueType::NullTerm => Value::NullTerm(from.as_string()?),
            ValueType::Binary => match from {
                Value::Binary(bytes) => Value::Binary(bytes.clone()),
                other => Value::Binary(other.as_string()?.into_bytes()),
            },
        })
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Int8(_) => ValueType::Int8,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::Float32(_) => ValueType::Float32,
            Value::Float64(_) => ValueType::Float64,
            Value::Utf(_) => ValueType::Utf,
            Value::NullTerm(_) => ValueType::NullTerm,
            Value::Binary(_) => ValueType::Binary,
        }
    }

    /// Best-effort integer view. Strings holding a decimal number are parsed,
    /// floats are truncated toward zero.
    pub fn as_long(&self) -> ValueResult<i64> {
        let err = || ValueError {
            from: self.value_type(),
            to: "long",
        };
        match self {
            Value::Int8(v) => Ok(*v as i64),
            Value::Int32(v) => Ok(*v as i64),
            Value::Int64(v) => Ok(*v),
            Value::Float32(v) => float_to_long(*v as f64).ok_or_else(err),
            Value::Float64(v) => float_to_long(*v).ok_or_else(err),
            Value::Utf(s) | Value::NullTerm(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(float_to_long))
                    .ok_or_else(err)
            }
            Value::Binary(_) => Err(err()),
        }
    }

    /// Best-effort floating point view.
    pub fn as_double(&self) -> ValueResult<f64> {
        match self {
            Value::Int8(v) => Ok(*v as f64),
            Value::Int32(v) => Ok(*v as f64),
            Value::Int64(v) => Ok(*v as f64),
            Value::Float32(v) => Ok(*v as f64),
            Value::Float64(v) => Ok(*v),
            Value::Utf(s) | Value::NullTerm(s) => s.trim().parse::<f64>().map_err(|_| ValueError {
                from: self.value_type(),
                to: "double",
            }),
            Value::Binary(_) => Err(ValueError {
                from: ValueType::Binary,
                to: "double",
            }),
        }
    }

    /// Textual view. Binary blobs are accepted when they hold valid UTF-8.
    pub fn as_string(&self) -> ValueResult<String> {
        match self {
            Value::Int8(v) => Ok(v.to_string()),
            Value::Int32(v) => Ok(v.to_string()),
            Value::Int64(v) => Ok(v.to_string()),
            Value::Float32(v) => Ok(v.to_string()),
            Value::Float64(v) => Ok(v.to_string()),
            Value::Utf(s) | Value::NullTerm(s) => Ok(s.clone()),
            Value::Binary(bytes) => String::from_utf8(bytes.clone()).map_err(|_| ValueError {
                from: ValueType::Binary,
                to: "string",
            }),
        }
    }

    /// Whether the ASCII writer must emit this value as hex bytes.
    ///
    /// Always true for blobs. Strings are hexed when any byte falls outside
    /// the printable field alphabet or when surrounding blanks would be lost
    /// to field trimming.
    pub fn must_write_ascii_as_hex(&self) -> bool {
        match self {
            Value::Binary(_) => true,
            Value::Utf(s) | Value::NullTerm(s) => !crate::codec::ascii::is_string_safe(s),
            _ => false,
        }
    }

    // ==================== Binary ====================

    /// Read a value of `value_type` from its binary form.
    pub fn read_binary<R: Read>(value_type: ValueType, input: &mut R) -> Result<Self, CodecError> {
        Ok(match value_type {
            ValueType::Int8 => Value::Int8(i8::from_be_bytes(read_array(input)?)),
            ValueType::Int32 => Value::Int32(i32::from_be_bytes(read_array(input)?)),
            ValueType::Int64 => Value::Int64(i64::from_be_bytes(read_array(input)?)),
            ValueType::Float32 => Value::Float32(f32::from_be_bytes(read_array(input)?)),
            ValueType::Float64 => Value::Float64(f64::from_be_bytes(read_array(input)?)),
            ValueType::Utf => {
                let len = u16::from_be_bytes(read_array(input)?) as usize;
                let bytes = read_vec(input, len)?;
                Value::Utf(String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?)
            }
            ValueType::NullTerm => {
                let mut bytes = Vec::new();
                loop {
                    let [b] = read_array::<_, 1>(input)?;
                    if b == 0 {
                        break;
                    }
                    if bytes.len() >= MAX_STRING_LEN {
                        return Err(CodecError::LengthOutOfRange(bytes.len() + 1));
                    }
                    bytes.push(b);
                }
                Value::NullTerm(String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?)
            }
            ValueType::Binary => {
                let len = u32::from_be_bytes(read_array(input)?) as usize;
                if len > MAX_BINARY_LEN {
                    return Err(CodecError::LengthOutOfRange(len));
                }
                Value::Binary(read_vec(input, len)?)
            }
        })
    }

    /// Write the binary form of this value.
    pub fn write_binary<W: Write>(&self, output: &mut W) -> Result<(), CodecError> {
        match self {
            Value::Int8(v) => output.write_all(&v.to_be_bytes())?,
            Value::Int32(v) => output.write_all(&v.to_be_bytes())?,
            Value::Int64(v) => output.write_all(&v.to_be_bytes())?,
            Value::Float32(v) => output.write_all(&v.to_be_bytes())?,
            Value::Float64(v) => output.write_all(&v.to_be_bytes())?,
            Value::Utf(s) => {
                let len =
                    u16::try_from(s.len()).map_err(|_| CodecError::LengthOutOfRange(s.len()))?;
                output.write_all(&len.to_be_bytes())?;
                output.write_all(s.as_bytes())?;
            }
            Value::NullTerm(s) => {
                if s.as_bytes().contains(&0) {
                    return Err(CodecError::InteriorNul);
                }
                output.write_all(s.as_bytes())?;
                output.write_all(&[0])?;
            }
            Value::Binary(bytes) => {
                if bytes.len() > MAX_BINARY_LEN {
                    return Err(CodecError::LengthOutOfRange(bytes.len()));
                }
                output.write_all(&(bytes.len() as u32).to_be_bytes())?;
                output.write_all(bytes)?;
            }
        }
        Ok(())
    }

    // ==================== ASCII ====================

    /// Parse a field body of the given type. With `hex` set the body is a run
    /// of hex digit pairs holding the raw bytes (big-endian for numbers).
    pub fn read_ascii(value_type: ValueType, body: &[u8], hex: bool) -> Result<Self, CodecError> {
        if hex {
            let bytes = hex::decode(body).map_err(|_| CodecError::InvalidHex)?;
            return Self::from_hex_bytes(value_type, bytes);
        }
        let text = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;
        let number_err = || CodecError::InvalidNumber(text.to_string());
        Ok(match value_type {
            ValueType::Int8 => Value::Int8(text.parse().map_err(|_| number_err())?),
            ValueType::Int32 => Value::Int32(text.parse().map_err(|_| number_err())?),
            ValueType::Int64 => Value::Int64(text.parse().map_err(|_| number_err())?),
            ValueType::Float32 => Value::Float32(text.parse().map_err(|_| number_err())?),
            ValueType::Float64 => Value::Float64(text.parse().map_err(|_| number_err())?),
            ValueType::Utf => Value::Utf(text.to_string()),
            ValueType::NullTerm => Value::NullTerm(text.to_string()),
            ValueType::Binary => Value::Binary(body.to_vec()),
        })
    }

    fn from_hex_bytes(value_type: ValueType, bytes: Vec<u8>) -> Result<Self, CodecError> {
        let int_from = |bytes: &[u8]| -> Result<i64, CodecError> {
            if bytes.is_empty() || bytes.len() > 8 {
                return Err(CodecError::LengthOutOfRange(bytes.len()));
            }
            // sign-extend from the leading byte
            let fill = if bytes[0] & 0x80 != 0 { 0xFF } else { 0x00 };
            let mut buf = [fill; 8];
            buf[8 - bytes.len()..].copy_from_slice(bytes);
            Ok(i64::from_be_bytes(buf))
        };
        Ok(match value_type {
            ValueType::Int8 | ValueType::Int32 | ValueType::Int64 => {
                Value::coerce(value_type, &Value::Int64(int_from(&bytes)?))
                    .map_err(|_| CodecError::InvalidNumber(hex::encode_upper(&bytes)))?
            }
            ValueType::Float32 | ValueType::Float64 => {
                let v = match bytes.len() {
                    4 => f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
                    8 => {
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(&bytes);
                        f64::from_be_bytes(buf)
                    }
                    n => return Err(CodecError::LengthOutOfRange(n)),
                };
                if value_type == ValueType::Float32 {
                    Value::Float32(v as f32)
                } else {
                    Value::Float64(v)
                }
            }
            ValueType::Utf | ValueType::NullTerm => {
                let text = String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
                if value_type == ValueType::NullTerm && text.contains('\0') {
                    return Err(CodecError::InteriorNul);
                }
                if value_type == ValueType::Utf {
                    Value::Utf(text)
                } else {
                    Value::NullTerm(text)
                }
            }
            ValueType::Binary => Value::Binary(bytes),
        })
    }

    /// Field body as the ASCII writer emits it, without any type prefix.
    pub fn ascii_body(&self) -> String {
        match self {
            Value::Int8(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => v.to_string(),
            // Debug keeps a fractional part ("1.0") so floats do not read back as ints
            Value::Float32(v) => format!("{:?}", *v as f64),
            Value::Float64(v) => format!("{:?}", v),
            Value::Utf(s) | Value::NullTerm(s) if self.must_write_ascii_as_hex() => {
                hex::encode_upper(s.as_bytes())
            }
            Value::Utf(s) | Value::NullTerm(s) => s.clone(),
            Value::Binary(bytes) => hex::encode_upper(bytes),
        }
    }

    /// Write the ASCII form of this value, including a type prefix whenever
    /// auto-detection would not recover the value's family.
    pub fn write_ascii<W: Write>(&self, output: &mut W) -> Result<(), CodecError> {
        output.write_all(crate::codec::ascii::format_field(self).as_bytes())?;
        Ok(())
    }
}

fn float_to_long(v: f64) -> Option<i64> {
    if v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v.trunc() as i64)
    } else {
        None
    }
}

fn read_array<R: Read, const N: usize>(input: &mut R) -> Result<[u8; N], CodecError> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf).map_err(CodecError::from_read)?;
    Ok(buf)
}

fn read_vec<R: Read>(input: &mut R, len: usize) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf).map_err(CodecError::from_read)?;
    Ok(buf)
}

// Floats hash by bit pattern so records can key the conversion cycle guard.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        match self {
            Value::Int8(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float32(v) => v.to_bits().hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Utf(s) | Value::NullTerm(s) => s.hash(state),
            Value::Binary(bytes) => bytes.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::codec::ascii::format_field(self))
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int8(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::NullTerm(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::NullTerm(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}
