//! Human-readable record layout.
//!
//! One record per line:
//!
//! ```text
//! [P10 T1500] 5 | 2.5 | hello | Bx:00FF | I:-3
//! ```
//!
//! - The optional flag section in brackets carries `P<nn>` (priority, one or
//!   two digits with optional `-`) and `T<ms>` (scheduled time). Blanks inside
//!   the brackets are ignored. It is omitted for default priority and no time.
//! - Fields are separated by `|`; blanks around a field are trimmed.
//! - A field may start with `I:`, `F:`, `S:` or `B:` to force its type, and
//!   `Ix:`, `Fx:`, `Sx:`, `Bx:` when the body is hex-encoded bytes.
//! - Without a prefix the type is detected from the body: every byte has a
//!   class (int < float < string < invalid) and the highest class present
//!   wins. Invalid bytes reject the record. Empty bodies are strings.

use crate::codec::{CodecError, CodecResult};
use crate::data::record::check_priority;
use crate::data::{Record, Value, ValueType, DEFAULT_PRIORITY, MAX_FIELDS};
use std::io::{BufRead, Write};

pub const FIELD_SEPARATOR: u8 = b'|';
pub const FLAGS_OPEN: u8 = b'[';
pub const FLAGS_CLOSE: u8 = b']';

/// Character classes ordered so that the maximum over a field decides its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CharClass {
    Int = 1,
    Float = 2,
    String = 3,
    Invalid = 4,
}

const fn build_class_table() -> [CharClass; 128] {
    let mut table = [CharClass::Invalid; 128];
    let mut b = 0x20;
    while b < 0x7F {
        table[b] = CharClass::String;
        b += 1;
    }
    let mut d = b'0';
    while d <= b'9' {
        table[d as usize] = CharClass::Int;
        d += 1;
    }
    table[b'.' as usize] = CharClass::Float;
    table[b'-' as usize] = CharClass::Float;
    table[b'+' as usize] = CharClass::Float;
    table[b'|' as usize] = CharClass::Invalid;
    table[b'[' as usize] = CharClass::Invalid;
    table[b']' as usize] = CharClass::Invalid;
    table
}

/// Class of every 7-bit byte. Bytes `>= 0x80` are invalid.
pub static CHAR_CLASS: [CharClass; 128] = build_class_table();

#[inline]
pub fn classify(byte: u8) -> CharClass {
    CHAR_CLASS
        .get(byte as usize)
        .copied()
        .unwrap_or(CharClass::Invalid)
}

/// Highest class across `body`, or the offending position of an invalid byte.
fn body_class(body: &[u8]) -> Result<CharClass, usize> {
    let mut class = CharClass::Int;
    for (i, &b) in body.iter().enumerate() {
        let c = classify(b);
        if c == CharClass::Invalid {
            return Err(i);
        }
        class = class.max(c);
    }
    Ok(class)
}

/// Whether a string can be written as a literal field body.
pub fn is_string_safe(s: &str) -> bool {
    let bytes = s.as_bytes();
    let trimmed = bytes.first() != Some(&b' ') && bytes.last() != Some(&b' ');
    trimmed && body_class(bytes).is_ok()
}

/// Auto-detect the value held by an unprefixed field body.
///
/// Numeric bodies that do not parse (`"-"`, `"1.2.3"`, an integer that
/// overflows `i64`) fall back to the next wider family.
pub fn detect_value(body: &[u8], column: usize) -> CodecResult<Value> {
    if body.is_empty() {
        return Ok(Value::NullTerm(String::new()));
    }
    let class = body_class(body).map_err(|i| CodecError::InvalidByte {
        byte: body[i],
        column: column + i,
    })?;
    // body_class only accepts ASCII
    let text = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;
    if class == CharClass::Int {
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Value::Int64(v));
        }
    }
    if class <= CharClass::Float {
        if let Ok(v) = text.parse::<f64>() {
            return Ok(Value::Float64(v));
        }
    }
    Ok(Value::NullTerm(text.to_string()))
}

/// Split off a `T:` / `Tx:` type prefix.
fn split_prefix(body: &[u8]) -> Option<(ValueType, bool, &[u8])> {
    let ty = ValueType::detect_from_type_char(*body.first()? as char)?;
    match body.get(1..) {
        Some([b':', ..]) => Some((ty, false, &body[2..])),
        Some([b'x', b':', ..]) => Some((ty, true, &body[3..])),
        _ => None,
    }
}

fn parse_field(field: &[u8], column: usize) -> CodecResult<Value> {
    match split_prefix(field) {
        Some((ty, true, body)) => Value::read_ascii(ty, body, true),
        Some((ty, false, body)) => {
            let offset = field.len() - body.len();
            if let Err(i) = body_class(body) {
                return Err(CodecError::InvalidByte {
                    byte: body[i],
                    column: column + offset + i,
                });
            }
            Value::read_ascii(ty, body, false)
        }
        None => detect_value(field, column),
    }
}

#[derive(Debug, Default, PartialEq)]
struct Flags {
    priority: Option<i32>,
    time: Option<u32>,
}

fn parse_flags(section: &[u8]) -> CodecResult<Flags> {
    let invalid = || CodecError::InvalidFlag(String::from_utf8_lossy(section).into_owned());
    let mut flags = Flags::default();
    let mut i = 0;
    let skip_blanks = |i: &mut usize| {
        while *i < section.len() && section[*i] == b' ' {
            *i += 1;
        }
    };
    loop {
        skip_blanks(&mut i);
        let Some(&letter) = section.get(i) else {
            break;
        };
        i += 1;
        skip_blanks(&mut i);
        let negative = section.get(i) == Some(&b'-');
        if negative {
            i += 1;
        }
        let start = i;
        while i < section.len() && section[i].is_ascii_digit() {
            i += 1;
        }
        let digits = &section[start..i];
        if digits.is_empty() {
            return Err(invalid());
        }
        // digits are ASCII
        let text = std::str::from_utf8(digits).map_err(|_| invalid())?;
        match letter {
            b'P' => {
                if digits.len() > 2 || flags.priority.is_some() {
                    return Err(invalid());
                }
                let magnitude: i32 = text.parse().map_err(|_| invalid())?;
                flags.priority = Some(if negative { -magnitude } else { magnitude });
            }
            b'T' => {
                if negative || flags.time.is_some() {
                    return Err(invalid());
                }
                flags.time = Some(text.parse().map_err(|_| invalid())?);
            }
            _ => return Err(invalid()),
        }
    }
    Ok(flags)
}

fn trim_blanks(mut s: &[u8]) -> &[u8] {
    while let [b' ', rest @ ..] = s {
        s = rest;
    }
    while let [rest @ .., b' '] = s {
        s = rest;
    }
    s
}

/// Parse a single line (without its terminator) into a record.
pub fn parse_line(line: &[u8]) -> CodecResult<Record> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let mut rest = trim_blanks(line);
    let mut column = line.len() - line.trim_ascii_start().len();

    let mut flags = Flags::default();
    if rest.first() == Some(&FLAGS_OPEN) {
        let close = rest
            .iter()
            .position(|&b| b == FLAGS_CLOSE)
            .ok_or(CodecError::UnterminatedFlags)?;
        flags = parse_flags(&rest[1..close])?;
        column += close + 1;
        rest = &rest[close + 1..];
    }

    let mut values = Vec::new();
    for raw in rest.split(|&b| b == FIELD_SEPARATOR) {
        if values.len() == MAX_FIELDS {
            return Err(CodecError::FieldCount(MAX_FIELDS + 1));
        }
        let leading = raw.len() - raw.trim_ascii_start().len();
        values.push(parse_field(trim_blanks(raw), column + leading)?);
        column += raw.len() + 1;
    }

    let priority = flags.priority.unwrap_or(DEFAULT_PRIORITY as i32);
    check_priority(priority).map_err(|_| CodecError::PriorityOutOfRange(priority))?;
    let mut record = Record::new(values)?.with_priority(priority)?;
    if let Some(time) = flags.time {
        record = record.with_time(time);
    }
    Ok(record)
}

/// Render one field exactly as the writer emits it.
pub fn format_field(value: &Value) -> String {
    let body = value.ascii_body();
    let family = value.value_type().family_char();
    if value.must_write_ascii_as_hex() {
        return format!("{}x:{}", family, body);
    }
    let detected = detect_value(body.as_bytes(), 0)
        .map(|v| v.value_type().family_char())
        .ok();
    if detected == Some(family) && split_prefix(body.as_bytes()).is_none() {
        body
    } else {
        format!("{}:{}", family, body)
    }
}

/// Render a record as a line without the trailing newline.
pub fn format_record(record: &Record) -> String {
    let mut line = String::new();
    let has_priority = record.priority() != DEFAULT_PRIORITY;
    if has_priority || record.time_ms().is_some() {
        line.push('[');
        if has_priority {
            let p = record.priority();
            if p < 0 {
                line.push_str(&format!("P-{:02}", -(p as i32)));
            } else {
                line.push_str(&format!("P{:02}", p));
            }
        }
        if let Some(time) = record.time_ms() {
            if has_priority {
                line.push(' ');
            }
            line.push_str(&format!("T{}", time));
        }
        line.push_str("] ");
    }
    let fields: Vec<String> = record.values().iter().map(format_field).collect();
    line.push_str(&fields.join(" | "));
    line
}

pub fn write_record<W: Write>(record: &Record, output: &mut W) -> CodecResult<()> {
    let mut line = format_record(record);
    line.push('\n');
    output.write_all(line.as_bytes())?;
    Ok(())
}

/// Read the next line and parse it. `Ok(None)` at end of stream. The whole
/// line is consumed even when it fails to parse.
pub fn read_record<R: BufRead>(input: &mut R) -> CodecResult<Option<Record>> {
    let mut line = Vec::new();
    if input.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    parse_line(&line).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(s: &str) -> Record {
        parse_line(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_class_table() {
        assert_eq!(classify(b'7'), CharClass::Int);
        assert_eq!(classify(b'.'), CharClass::Float);
        assert_eq!(classify(b'-'), CharClass::Float);
        assert_eq!(classify(b'a'), CharClass::String);
        assert_eq!(classify(b' '), CharClass::String);
        assert_eq!(classify(b'\t'), CharClass::Invalid);
        assert_eq!(classify(b'|'), CharClass::Invalid);
        assert_eq!(classify(0x7F), CharClass::Invalid);
        assert_eq!(classify(0xC3), CharClass::Invalid);
    }

    #[test]
    fn test_auto_detection() {
        let r = parse("5 | 2.5 | hello");
        assert_eq!(
            r.values(),
            &[
                Value::Int64(5),
                Value::Float64(2.5),
                Value::NullTerm("hello".into())
            ]
        );
        assert_eq!(r.priority(), 0);
        assert_eq!(r.time_ms(), None);
    }

    #[test]
    fn test_minus_is_float_class() {
        assert_eq!(parse("-5").values(), &[Value::Float64(-5.0)]);
        assert_eq!(parse("I:-5").values(), &[Value::Int64(-5)]);
    }

    #[test]
    fn test_hex_looking_text_is_string() {
        assert_eq!(parse("CAFE").values(), &[Value::NullTerm("CAFE".into())]);
    }

    #[test]
    fn test_unparseable_numbers_fall_back() {
        assert_eq!(parse("1.2.3").values(), &[Value::NullTerm("1.2.3".into())]);
        assert_eq!(
            parse("99999999999999999999").values(),
            &[Value::Float64(99999999999999999999.0)]
        );
    }

    #[test]
    fn test_flag_section() {
        let r = parse("[P10]99");
        assert_eq!(r.priority(), 10);
        assert_eq!(r.values(), &[Value::Int64(99)]);

        let r = parse("  [ P -7  T 1500 ] x");
        assert_eq!(r.priority(), -7);
        assert_eq!(r.time_ms(), Some(1500));
    }

    #[test]
    fn test_flag_errors() {
        assert!(matches!(
            parse_line(b"[P10 99"),
            Err(CodecError::UnterminatedFlags)
        ));
        assert!(matches!(
            parse_line(b"[P100] 1"),
            Err(CodecError::InvalidFlag(_))
        ));
        assert!(matches!(
            parse_line(b"[Q1] 1"),
            Err(CodecError::InvalidFlag(_))
        ));
        assert!(matches!(
            parse_line(b"[P] 1"),
            Err(CodecError::InvalidFlag(_))
        ));
    }

    #[test]
    fn test_prefixes() {
        let r = parse("S:42 | B:raw | Bx:00ff | Sx:6869 | F:3");
        assert_eq!(
            r.values(),
            &[
                Value::NullTerm("42".into()),
                Value::Binary(b"raw".to_vec()),
                Value::Binary(vec![0x00, 0xFF]),
                Value::NullTerm("hi".into()),
                Value::Float64(3.0),
            ]
        );
    }

    #[test]
    fn test_invalid_byte_rejects_record() {
        let err = parse_line(b"ok | bad\tbyte").unwrap_err();
        assert!(matches!(err, CodecError::InvalidByte { byte: b'\t', .. }));
        assert!(matches!(
            parse_line(b"I:12x"),
            Err(CodecError::InvalidNumber(_))
        ));
        assert!(matches!(parse_line(b"Bx:0"), Err(CodecError::InvalidHex)));
    }

    #[test]
    fn test_empty_fields_are_strings() {
        let r = parse("a || b");
        assert_eq!(r.values()[1], Value::NullTerm(String::new()));
        assert_eq!(parse("").values(), &[Value::NullTerm(String::new())]);
    }

    #[test]
    fn test_too_many_fields() {
        assert!(matches!(
            parse_line(b"1|2|3|4|5|6|7|8|9"),
            Err(CodecError::FieldCount(9))
        ));
    }

    #[test]
    fn test_writer_output() {
        let r = Record::new(vec![
            Value::Int64(5),
            Value::Float64(2.5),
            Value::NullTerm("hello".into()),
        ])
        .unwrap();
        assert_eq!(format_record(&r), "5 | 2.5 | hello");

        let r = Record::new(vec![Value::Int64(99)])
            .unwrap()
            .with_priority(10)
            .unwrap();
        assert_eq!(format_record(&r), "[P10] 99");

        let r = Record::new(vec![Value::Int32(-3)])
            .unwrap()
            .with_priority(-5)
            .unwrap()
            .with_time(20);
        assert_eq!(format_record(&r), "[P-05 T20] I:-3");
    }

    #[test]
    fn test_writer_escapes_ambiguous_strings() {
        assert_eq!(format_field(&Value::NullTerm("123".into())), "S:123");
        assert_eq!(format_field(&Value::NullTerm("S:x".into())), "S:S:x");
        assert_eq!(format_field(&Value::NullTerm(" pad".into())), "Sx:20706164");
        assert_eq!(format_field(&Value::Utf("a|b".into())), "Sx:617C62");
        assert_eq!(format_field(&Value::Binary(vec![1, 2])), "Bx:0102");
        assert_eq!(format_field(&Value::Float64(f64::INFINITY)), "F:inf");
    }

    #[test]
    fn test_reader_consumes_bad_lines() {
        let mut input = Cursor::new(b"1\n[P5 broken\n3\n".to_vec());
        assert_eq!(read_record(&mut input).unwrap().unwrap().values(), &[Value::Int64(1)]);
        assert!(read_record(&mut input).is_err());
        assert_eq!(read_record(&mut input).unwrap().unwrap().values(), &[Value::Int64(3)]);
        assert!(read_record(&mut input).unwrap().is_none());
    }

    #[test]
    fn test_crlf_tolerated() {
        assert_eq!(parse("7\r").values(), &[Value::Int64(7)]);
    }
}
