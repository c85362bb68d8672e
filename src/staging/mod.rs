//! Row staging: fixed-width slots, the long-string dictionary and the
//! buffers rows are packed into before they are transposed.

mod buffer;
mod dictionary;
pub mod slot;

pub use buffer::{BufferPool, BufferRecycler, StagingBuffer};
pub use dictionary::{DictionarySnapshot, StringDictionary};
pub use slot::{Slot, DICTIONARY_SENTINEL, INLINE_CAPACITY, SLOT_WIDTH};

use thiserror::Error;

use crate::value::{LogicalType, TimestampKind};

/// Errors raised while encoding or decoding a single slot.
///
/// These carry no column name; the writer attaches one when it reports them.
#[derive(Debug, Error, PartialEq)]
pub enum SlotError {
    #[error("value is null")]
    Null,

    #[error("timestamp kind is {0:?}, only UTC timestamps are accepted")]
    TimestampKind(TimestampKind),

    #[error("timestamp is outside the nanosecond range")]
    TimestampOutOfRange,

    #[error("decimal cannot be represented as f64")]
    DecimalOutOfRange,

    #[error("{0} values have no slot encoding")]
    Unsupported(&'static str),

    #[error("column is {expected}, got a {got} value")]
    TypeMismatch {
        expected: LogicalType,
        got: &'static str,
    },

    #[error("string dictionary is full")]
    DictionaryFull,

    #[error("dictionary index {index} not in snapshot of {len} strings")]
    DictionaryIndex { index: u32, len: usize },

    #[error("inline string length {0} exceeds slot capacity")]
    InlineLength(u8),

    #[error("invalid UTF-8 in inline string: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}
