//! Fixed-width slot encoding.
//!
//! Every field occupies exactly `SLOT_WIDTH` bytes in the staging buffer.
//! Numbers, booleans and timestamps are stored little-endian and zero padded.
//! Strings are either inlined or point into the `StringDictionary`:
//!
//! ```text
//! inline:     [len][b0][b1][b2][b3][b4][b5][b6]     len <= 7
//! dictionary: [255][ 0][ 0][ 0][ index (u32 LE) ]
//! ```

use rust_decimal::prelude::ToPrimitive;

use super::dictionary::{DictionarySnapshot, StringDictionary};
use super::SlotError;
use crate::value::{FieldValue, LogicalType, TimestampKind};

pub const SLOT_WIDTH: usize = 8;

/// Length byte marking a dictionary reference. Never a valid inline length.
pub const DICTIONARY_SENTINEL: u8 = 255;

/// Longest string, in UTF-8 bytes, stored inside the slot itself.
pub const INLINE_CAPACITY: usize = SLOT_WIDTH - 1;

const DICTIONARY_INDEX_OFFSET: usize = 4;

pub type Slot = [u8; SLOT_WIDTH];

/// Work out which column type a value belongs in, rejecting values that
/// can never be written.
pub fn classify(value: &FieldValue<'_>) -> Result<LogicalType, SlotError> {
    match value {
        FieldValue::Int16(_) => Ok(LogicalType::Int16),
        FieldValue::Int32(_) => Ok(LogicalType::Int32),
        FieldValue::Int64(_) => Ok(LogicalType::Int64),
        FieldValue::Float32(_) => Ok(LogicalType::Float32),
        FieldValue::Float64(_) | FieldValue::Decimal(_) => Ok(LogicalType::Float64),
        FieldValue::Bool(_) => Ok(LogicalType::Bool),
        FieldValue::String(_) => Ok(LogicalType::String),
        FieldValue::Timestamp(ts) => {
            if ts.kind() != TimestampKind::Utc {
                return Err(SlotError::TimestampKind(ts.kind()));
            }
            ts.ticks().ok_or(SlotError::TimestampOutOfRange)?;
            Ok(LogicalType::Timestamp)
        }
        FieldValue::Null => Err(SlotError::Null),
        other @ (FieldValue::UInt64(_) | FieldValue::Binary(_)) => {
            Err(SlotError::Unsupported(other.kind_name()))
        }
    }
}

/// Encode `value` for a column of type `column_type`.
///
/// Nothing is written anywhere on failure; long strings only reach the
/// dictionary once every check has passed.
pub fn encode(
    value: &FieldValue<'_>,
    column_type: LogicalType,
    dictionary: &mut StringDictionary,
) -> Result<Slot, SlotError> {
    let value_type = classify(value)?;
    if value_type != column_type {
        return Err(SlotError::TypeMismatch {
            expected: column_type,
            got: value.kind_name(),
        });
    }

    let mut slot = [0u8; SLOT_WIDTH];
    match value {
        FieldValue::Int16(v) => slot[..2].copy_from_slice(&v.to_le_bytes()),
        FieldValue::Int32(v) => slot[..4].copy_from_slice(&v.to_le_bytes()),
        FieldValue::Int64(v) => slot = v.to_le_bytes(),
        FieldValue::Float32(v) => slot[..4].copy_from_slice(&v.to_le_bytes()),
        FieldValue::Float64(v) => slot = v.to_le_bytes(),
        FieldValue::Decimal(d) => {
            let v = d.to_f64().ok_or(SlotError::DecimalOutOfRange)?;
            slot = v.to_le_bytes();
        }
        FieldValue::Bool(v) => slot[0] = u8::from(*v),
        FieldValue::Timestamp(ts) => {
            let ticks = ts.ticks().ok_or(SlotError::TimestampOutOfRange)?;
            slot = ticks.to_le_bytes();
        }
        FieldValue::String(s) => encode_str(s, dictionary, &mut slot)?,
        // classify() already rejected these
        FieldValue::UInt64(_) | FieldValue::Binary(_) | FieldValue::Null => {
            return Err(SlotError::Unsupported(value.kind_name()));
        }
    }
    Ok(slot)
}

fn encode_str(
    value: &str,
    dictionary: &mut StringDictionary,
    slot: &mut Slot,
) -> Result<(), SlotError> {
    let bytes = value.as_bytes();
    if bytes.len() <= INLINE_CAPACITY {
        slot[0] = bytes.len() as u8;
        slot[1..1 + bytes.len()].copy_from_slice(bytes);
        return Ok(());
    }

    let index = dictionary.intern(value)?;
    slot[0] = DICTIONARY_SENTINEL;
    slot[DICTIONARY_INDEX_OFFSET..].copy_from_slice(&index.to_le_bytes());
    Ok(())
}

#[inline]
fn word(slot: &[u8]) -> Slot {
    let mut out = [0u8; SLOT_WIDTH];
    out.copy_from_slice(&slot[..SLOT_WIDTH]);
    out
}

#[inline]
pub fn decode_i16(slot: &[u8]) -> i16 {
    i16::from_le_bytes([slot[0], slot[1]])
}

#[inline]
pub fn decode_i32(slot: &[u8]) -> i32 {
    i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]])
}

#[inline]
pub fn decode_i64(slot: &[u8]) -> i64 {
    i64::from_le_bytes(word(slot))
}

#[inline]
pub fn decode_f32(slot: &[u8]) -> f32 {
    f32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]])
}

#[inline]
pub fn decode_f64(slot: &[u8]) -> f64 {
    f64::from_le_bytes(word(slot))
}

#[inline]
pub fn decode_bool(slot: &[u8]) -> bool {
    slot[0] != 0
}

/// Decode a string slot, resolving dictionary references against `snapshot`.
pub fn decode_str<'a>(
    slot: &'a [u8],
    snapshot: &'a DictionarySnapshot,
) -> Result<&'a str, SlotError> {
    let len = slot[0];
    if len == DICTIONARY_SENTINEL {
        let index = u32::from_le_bytes([slot[4], slot[5], slot[6], slot[7]]);
        return snapshot.get(index).ok_or(SlotError::DictionaryIndex {
            index,
            len: snapshot.len(),
        });
    }

    let len = len as usize;
    if len > INLINE_CAPACITY {
        return Err(SlotError::InlineLength(slot[0]));
    }
    Ok(std::str::from_utf8(&slot[1..1 + len])?)
}
