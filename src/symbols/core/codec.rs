//! Typed value codec: type tag + raw bytes → canonical display string.
//!
//! Conventions:
//! - tags are matched exactly (case-sensitive), same nomenclature as the controller
//! - raw values are little-endian
//! - TIME/TOD are u32 milliseconds, DATE/DT are u32 seconds since 1970-01-01T00:00:00
//! - decoding never panics; `decode_display` never fails

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use encoding_rs::WINDOWS_1252;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::symbols::adapters::driver::DriverError;

/// Display value for tags with no decode strategy.
pub const UNSUPPORTED_TYPE_DISPLAY: &str = "";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum StringLengthSource {
    /// Read `n` bytes, `n` parsed from `STRING(n)`.
    #[default]
    DeclaredCapacity,
    /// Read the symbol's `size` bytes (includes the terminator).
    SymbolSize,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnknownTypePolicy {
    #[default]
    Unsupported,
    /// Read `size` bytes and show them as text.
    ReadAsString,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    #[serde(default)]
    pub string_length: StringLengthSource,
    #[serde(default)]
    pub unknown_type: UnknownTypePolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextLength {
    Chars(usize),
    SymbolSize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueStrategy {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real32,
    Real64,
    Time,
    TimeOfDay,
    Date,
    DateAndTime,
    Text(TextLength),
}

impl ValueStrategy {
    /// Number of bytes to request from the driver.
    pub fn read_size(&self, symbol_size: u32) -> usize {
        match self {
            ValueStrategy::Bool | ValueStrategy::Int8 | ValueStrategy::UInt8 => 1,
            ValueStrategy::Int16 | ValueStrategy::UInt16 => 2,
            ValueStrategy::Int32
            | ValueStrategy::UInt32
            | ValueStrategy::Real32
            | ValueStrategy::Time
            | ValueStrategy::TimeOfDay
            | ValueStrategy::Date
            | ValueStrategy::DateAndTime => 4,
            ValueStrategy::Int64 | ValueStrategy::UInt64 | ValueStrategy::Real64 => 8,
            ValueStrategy::Text(TextLength::Chars(n)) => *n,
            ValueStrategy::Text(TextLength::SymbolSize) => symbol_size as usize,
        }
    }
}

const SCALAR_STRATEGIES: &[(&str, ValueStrategy)] = &[
    ("BOOL", ValueStrategy::Bool),
    ("BYTE", ValueStrategy::UInt8),
    ("USINT", ValueStrategy::UInt8),
    ("SINT", ValueStrategy::Int8),
    ("INT", ValueStrategy::Int16),
    ("UINT", ValueStrategy::UInt16),
    ("WORD", ValueStrategy::UInt16),
    ("DINT", ValueStrategy::Int32),
    ("UDINT", ValueStrategy::UInt32),
    ("DWORD", ValueStrategy::UInt32),
    ("LINT", ValueStrategy::Int64),
    ("ULINT", ValueStrategy::UInt64),
    ("LWORD", ValueStrategy::UInt64),
    ("REAL", ValueStrategy::Real32),
    ("LREAL", ValueStrategy::Real64),
    ("TIME", ValueStrategy::Time),
    ("TIME_OF_DAY", ValueStrategy::TimeOfDay),
    ("TOD", ValueStrategy::TimeOfDay),
    ("DATE", ValueStrategy::Date),
    ("DATE_AND_TIME", ValueStrategy::DateAndTime),
    ("DT", ValueStrategy::DateAndTime),
];

fn scalar_table() -> &'static HashMap<&'static str, ValueStrategy> {
    static TABLE: OnceLock<HashMap<&'static str, ValueStrategy>> = OnceLock::new();
    TABLE.get_or_init(|| SCALAR_STRATEGIES.iter().copied().collect())
}

#[derive(Clone, Debug, PartialEq)]
pub enum DecodedValue {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    Time(Duration),
    TimeOfDay(Duration),
    Date(NaiveDate),
    DateAndTime(NaiveDateTime),
    Text(String),
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Bool(v) => write!(f, "{v}"),
            DecodedValue::Int8(v) => write!(f, "{v}"),
            DecodedValue::UInt8(v) => write!(f, "{v}"),
            DecodedValue::Int16(v) => write!(f, "{v}"),
            DecodedValue::UInt16(v) => write!(f, "{v}"),
            DecodedValue::Int32(v) => write!(f, "{v}"),
            DecodedValue::UInt32(v) => write!(f, "{v}"),
            DecodedValue::Int64(v) => write!(f, "{v}"),
            DecodedValue::UInt64(v) => write!(f, "{v}"),
            DecodedValue::Real32(v) => write!(f, "{v}"),
            DecodedValue::Real64(v) => write!(f, "{v}"),
            DecodedValue::Time(d) => {
                let total_ms = d.as_millis();
                let minutes = total_ms / 60_000;
                let seconds = (total_ms / 1_000) % 60;
                let millis = total_ms % 1_000;
                if minutes > 0 {
                    write!(f, "T#{minutes}m{seconds}s{millis}ms")
                } else if seconds > 0 {
                    write!(f, "T#{seconds}s{millis}ms")
                } else {
                    write!(f, "T#{millis}ms")
                }
            }
            DecodedValue::TimeOfDay(d) => {
                let total_ms = d.as_millis();
                let hours = total_ms / 3_600_000;
                let minutes = (total_ms / 60_000) % 60;
                let seconds = (total_ms / 1_000) % 60;
                let millis = total_ms % 1_000;
                if hours > 0 {
                    write!(f, "TOD#{hours}:{minutes}:{seconds}.{millis}")
                } else if minutes > 0 {
                    write!(f, "TOD#{minutes}:{seconds}.{millis}")
                } else {
                    write!(f, "TOD#{seconds}.{millis}")
                }
            }
            DecodedValue::Date(d) => write!(f, "D#{}-{}-{}", d.year(), d.month(), d.day()),
            DecodedValue::DateAndTime(dt) => write!(
                f,
                "DT#{}-{}-{}-{}:{}:{}",
                dt.year(),
                dt.month(),
                dt.day(),
                dt.hour(),
                dt.minute(),
                dt.second()
            ),
            DecodedValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("read failed for {type_tag}: {source}")]
    Read {
        type_tag: String,
        #[source]
        source: DriverError,
    },

    #[error("short read for {type_tag}: expected {expected} bytes got {got}")]
    ShortRead {
        type_tag: String,
        expected: usize,
        got: usize,
    },

    #[error("malformed string type tag: {type_tag}")]
    MalformedStringTag { type_tag: String },

    #[error("unsupported type: {type_tag}")]
    UnsupportedType { type_tag: String },

    #[error("{type_tag} value {raw} is out of calendar range")]
    InvalidDate { type_tag: String, raw: u32 },
}

impl DecodeError {
    pub fn type_tag(&self) -> &str {
        match self {
            DecodeError::Read { type_tag, .. }
            | DecodeError::ShortRead { type_tag, .. }
            | DecodeError::MalformedStringTag { type_tag }
            | DecodeError::UnsupportedType { type_tag }
            | DecodeError::InvalidDate { type_tag, .. } => type_tag,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, DecodeError::UnsupportedType { .. })
    }
}

pub fn strategy_for_tag(type_tag: &str, options: &CodecOptions) -> Result<ValueStrategy, DecodeError> {
    if let Some(strategy) = scalar_table().get(type_tag) {
        return Ok(*strategy);
    }

    if type_tag.starts_with("STRING") {
        let capacity = parse_string_capacity(type_tag)?;
        return Ok(match options.string_length {
            StringLengthSource::DeclaredCapacity => ValueStrategy::Text(TextLength::Chars(capacity)),
            StringLengthSource::SymbolSize => ValueStrategy::Text(TextLength::SymbolSize),
        });
    }

    match options.unknown_type {
        UnknownTypePolicy::Unsupported => Err(DecodeError::UnsupportedType {
            type_tag: type_tag.to_string(),
        }),
        UnknownTypePolicy::ReadAsString => Ok(ValueStrategy::Text(TextLength::SymbolSize)),
    }
}

/// `STRING(80)` → 80
pub fn parse_string_capacity(type_tag: &str) -> Result<usize, DecodeError> {
    let malformed = || DecodeError::MalformedStringTag {
        type_tag: type_tag.to_string(),
    };

    let inner = type_tag
        .strip_prefix("STRING(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(malformed)?;

    if inner.is_empty() || !inner.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    inner.parse::<usize>().map_err(|_| malformed())
}

/// Bytes to request for a symbol; tags without a strategy fall back to the symbol size
/// so batch requests stay positional.
pub fn request_size(type_tag: &str, symbol_size: u32, options: &CodecOptions) -> usize {
    strategy_for_tag(type_tag, options)
        .map(|strategy| strategy.read_size(symbol_size))
        .unwrap_or(symbol_size as usize)
}

pub fn decode_bytes(
    type_tag: &str,
    strategy: ValueStrategy,
    bytes: &[u8],
) -> Result<DecodedValue, DecodeError> {
    let value = match strategy {
        ValueStrategy::Bool => DecodedValue::Bool(fixed::<1>(type_tag, bytes)?[0] != 0),
        ValueStrategy::Int8 => DecodedValue::Int8(i8::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::UInt8 => DecodedValue::UInt8(fixed::<1>(type_tag, bytes)?[0]),
        ValueStrategy::Int16 => DecodedValue::Int16(i16::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::UInt16 => DecodedValue::UInt16(u16::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::Int32 => DecodedValue::Int32(i32::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::UInt32 => DecodedValue::UInt32(u32::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::Int64 => DecodedValue::Int64(i64::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::UInt64 => DecodedValue::UInt64(u64::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::Real32 => DecodedValue::Real32(f32::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::Real64 => DecodedValue::Real64(f64::from_le_bytes(fixed(type_tag, bytes)?)),
        ValueStrategy::Time => {
            let ms = u32::from_le_bytes(fixed(type_tag, bytes)?);
            DecodedValue::Time(Duration::from_millis(u64::from(ms)))
        }
        ValueStrategy::TimeOfDay => {
            let ms = u32::from_le_bytes(fixed(type_tag, bytes)?);
            DecodedValue::TimeOfDay(Duration::from_millis(u64::from(ms)))
        }
        ValueStrategy::Date => {
            let seconds = u32::from_le_bytes(fixed(type_tag, bytes)?);
            DecodedValue::Date(epoch_plus_seconds(type_tag, seconds)?.date())
        }
        ValueStrategy::DateAndTime => {
            let seconds = u32::from_le_bytes(fixed(type_tag, bytes)?);
            DecodedValue::DateAndTime(epoch_plus_seconds(type_tag, seconds)?)
        }
        ValueStrategy::Text(_) => DecodedValue::Text(decode_text(bytes)),
    };

    Ok(value)
}

/// Looks up the strategy for `type_tag`, asks `read` for the matching number of
/// bytes and decodes them.
pub fn decode<R>(
    type_tag: &str,
    symbol_size: u32,
    options: &CodecOptions,
    read: R,
) -> Result<DecodedValue, DecodeError>
where
    R: FnOnce(usize) -> Result<Vec<u8>, DriverError>,
{
    let strategy = strategy_for_tag(type_tag, options)?;
    let bytes = read(strategy.read_size(symbol_size)).map_err(|source| DecodeError::Read {
        type_tag: type_tag.to_string(),
        source,
    })?;
    decode_bytes(type_tag, strategy, &bytes)
}

/// Like [`decode`], but always yields something to show in a cell.
pub fn decode_display<R>(type_tag: &str, symbol_size: u32, options: &CodecOptions, read: R) -> String
where
    R: FnOnce(usize) -> Result<Vec<u8>, DriverError>,
{
    match decode(type_tag, symbol_size, options, read) {
        Ok(value) => value.to_string(),
        Err(err) => error_display(&err),
    }
}

pub fn error_display(err: &DecodeError) -> String {
    if err.is_unsupported() {
        UNSUPPORTED_TYPE_DISPLAY.to_string()
    } else {
        err.to_string()
    }
}

fn fixed<const N: usize>(type_tag: &str, bytes: &[u8]) -> Result<[u8; N], DecodeError> {
    bytes
        .get(..N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| DecodeError::ShortRead {
            type_tag: type_tag.to_string(),
            expected: N,
            got: bytes.len(),
        })
}

fn epoch_plus_seconds(type_tag: &str, seconds: u32) -> Result<NaiveDateTime, DecodeError> {
    DateTime::from_timestamp(i64::from(seconds), 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| DecodeError::InvalidDate {
            type_tag: type_tag.to_string(),
            raw: seconds,
        })
}

fn decode_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(&bytes[..end]);
    text.into_owned()
}
