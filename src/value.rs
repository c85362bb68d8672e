//! Typed field values accepted by the row writer.
//!
//! `FieldValue` is a closed set of value kinds. The writer picks the slot
//! encoding by matching on the variant, and the first row's variants decide
//! the column types of the file.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use rust_decimal::Decimal;

/// Logical type of a column, fixed when the schema is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    String,
    Timestamp,
}

impl LogicalType {
    pub fn name(&self) -> &'static str {
        match self {
            LogicalType::Int16 => "int16",
            LogicalType::Int32 => "int32",
            LogicalType::Int64 => "int64",
            LogicalType::Float32 => "float32",
            LogicalType::Float64 => "float64",
            LogicalType::Bool => "bool",
            LogicalType::String => "string",
            LogicalType::Timestamp => "timestamp",
        }
    }

    /// Floating point columns rarely benefit from dictionary pages.
    pub fn is_floating(&self) -> bool {
        matches!(self, LogicalType::Float32 | LogicalType::Float64)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which clock a timestamp was taken against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampKind {
    Utc,
    Local,
    Unspecified,
}

/// A wall-clock reading tagged with the clock it belongs to.
///
/// Only `TimestampKind::Utc` values can be written. The tag is dropped when
/// the value is staged and the column is read back as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    naive: NaiveDateTime,
    kind: TimestampKind,
}

impl Timestamp {
    fn new(naive: NaiveDateTime, kind: TimestampKind) -> Self {
        Self { naive, kind }
    }

    pub fn utc(naive: NaiveDateTime) -> Self {
        Self::new(naive, TimestampKind::Utc)
    }

    /// Build a UTC timestamp from nanoseconds since the Unix epoch.
    pub fn from_utc_nanos(nanos: i64) -> Self {
        Self::utc(DateTime::from_timestamp_nanos(nanos).naive_utc())
    }

    pub fn kind(&self) -> TimestampKind {
        self.kind
    }

    /// Nanoseconds since the Unix epoch, ignoring the kind tag.
    ///
    /// Returns `None` outside the range an `i64` nanosecond count can hold
    /// (roughly years 1677 to 2262).
    pub fn ticks(&self) -> Option<i64> {
        self.naive.and_utc().timestamp_nanos_opt()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::utc(value.naive_utc())
    }
}

impl From<DateTime<Local>> for Timestamp {
    fn from(value: DateTime<Local>) -> Self {
        Self::new(value.naive_local(), TimestampKind::Local)
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(value: NaiveDateTime) -> Self {
        Self::new(value, TimestampKind::Unspecified)
    }
}

/// A single field value handed to the writer.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    /// Stored in a `Float64` column. The conversion is lossy.
    Decimal(Decimal),
    String(Cow<'a, str>),
    Timestamp(Timestamp),
    /// Accepted by the API but has no slot encoding.
    UInt64(u64),
    /// Accepted by the API but has no slot encoding.
    Binary(Cow<'a, [u8]>),
    Null,
}

impl FieldValue<'_> {
    /// Short name of the value kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Int16(_) => "int16",
            FieldValue::Int32(_) => "int32",
            FieldValue::Int64(_) => "int64",
            FieldValue::Float32(_) => "float32",
            FieldValue::Float64(_) => "float64",
            FieldValue::Bool(_) => "bool",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::String(_) => "string",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::UInt64(_) => "uint64",
            FieldValue::Binary(_) => "binary",
            FieldValue::Null => "null",
        }
    }

    /// Detach the value from any borrowed data.
    pub fn into_owned(self) -> FieldValue<'static> {
        match self {
            FieldValue::Int16(v) => FieldValue::Int16(v),
            FieldValue::Int32(v) => FieldValue::Int32(v),
            FieldValue::Int64(v) => FieldValue::Int64(v),
            FieldValue::Float32(v) => FieldValue::Float32(v),
            FieldValue::Float64(v) => FieldValue::Float64(v),
            FieldValue::Bool(v) => FieldValue::Bool(v),
            FieldValue::Decimal(v) => FieldValue::Decimal(v),
            FieldValue::String(v) => FieldValue::String(Cow::Owned(v.into_owned())),
            FieldValue::Timestamp(v) => FieldValue::Timestamp(v),
            FieldValue::UInt64(v) => FieldValue::UInt64(v),
            FieldValue::Binary(v) => FieldValue::Binary(Cow::Owned(v.into_owned())),
            FieldValue::Null => FieldValue::Null,
        }
    }
}

impl From<i16> for FieldValue<'_> {
    fn from(value: i16) -> Self {
        FieldValue::Int16(value)
    }
}

impl From<i32> for FieldValue<'_> {
    fn from(value: i32) -> Self {
        FieldValue::Int32(value)
    }
}

impl From<i64> for FieldValue<'_> {
    fn from(value: i64) -> Self {
        FieldValue::Int64(value)
    }
}

impl From<f32> for FieldValue<'_> {
    fn from(value: f32) -> Self {
        FieldValue::Float32(value)
    }
}

impl From<f64> for FieldValue<'_> {
    fn from(value: f64) -> Self {
        FieldValue::Float64(value)
    }
}

impl From<bool> for FieldValue<'_> {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Decimal> for FieldValue<'_> {
    fn from(value: Decimal) -> Self {
        FieldValue::Decimal(value)
    }
}

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(value: &'a str) -> Self {
        FieldValue::String(Cow::Borrowed(value))
    }
}

impl<'a> From<&'a String> for FieldValue<'a> {
    fn from(value: &'a String) -> Self {
        FieldValue::String(Cow::Borrowed(value.as_str()))
    }
}

impl From<String> for FieldValue<'_> {
    fn from(value: String) -> Self {
        FieldValue::String(Cow::Owned(value))
    }
}

impl From<Timestamp> for FieldValue<'_> {
    fn from(value: Timestamp) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for FieldValue<'_> {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value.into())
    }
}

impl From<DateTime<Local>> for FieldValue<'_> {
    fn from(value: DateTime<Local>) -> Self {
        FieldValue::Timestamp(value.into())
    }
}

impl From<NaiveDateTime> for FieldValue<'_> {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::Timestamp(value.into())
    }
}

impl From<u64> for FieldValue<'_> {
    fn from(value: u64) -> Self {
        FieldValue::UInt64(value)
    }
}

impl<'a> From<&'a [u8]> for FieldValue<'a> {
    fn from(value: &'a [u8]) -> Self {
        FieldValue::Binary(Cow::Borrowed(value))
    }
}

impl From<Vec<u8>> for FieldValue<'_> {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Binary(Cow::Owned(value))
    }
}

impl<'a, T: Into<FieldValue<'a>>> From<Option<T>> for FieldValue<'a> {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}
