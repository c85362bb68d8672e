//! Row-major staging buffer to column-major Arrow arrays.
//!
//! Runs on the flush worker. Each column is read by striding through the
//! buffer one row width at a time, starting at the column's own slot.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    StringBuilder, TimestampNanosecondArray,
};

use crate::schema::{TableSchema, UTC};
use crate::staging::slot::{
    decode_bool, decode_f32, decode_f64, decode_i16, decode_i32, decode_i64, decode_str,
};
use crate::staging::{DictionarySnapshot, SlotError, StagingBuffer, INLINE_CAPACITY};
use crate::value::LogicalType;

/// Decode every committed row of `buffer` into one array per schema column.
///
/// String slots referring to the dictionary are resolved against `snapshot`,
/// which must have been taken after the buffer was filled.
pub fn transpose(
    buffer: &StagingBuffer,
    schema: &TableSchema,
    snapshot: &DictionarySnapshot,
) -> Result<Vec<ArrayRef>, SlotError> {
    schema
        .columns()
        .iter()
        .map(|column| transpose_column(buffer, column.ordinal(), column.logical_type(), snapshot))
        .collect()
}

fn transpose_column(
    buffer: &StagingBuffer,
    ordinal: usize,
    logical_type: LogicalType,
    snapshot: &DictionarySnapshot,
) -> Result<ArrayRef, SlotError> {
    let slots = buffer.column_slots(ordinal);
    let array: ArrayRef = match logical_type {
        LogicalType::Int16 => Arc::new(Int16Array::from_iter_values(slots.map(decode_i16))),
        LogicalType::Int32 => Arc::new(Int32Array::from_iter_values(slots.map(decode_i32))),
        LogicalType::Int64 => Arc::new(Int64Array::from_iter_values(slots.map(decode_i64))),
        LogicalType::Float32 => Arc::new(Float32Array::from_iter_values(slots.map(decode_f32))),
        LogicalType::Float64 => Arc::new(Float64Array::from_iter_values(slots.map(decode_f64))),
        LogicalType::Bool => {
            Arc::new(BooleanArray::from(slots.map(decode_bool).collect::<Vec<_>>()))
        }
        LogicalType::Timestamp => Arc::new(
            TimestampNanosecondArray::from_iter_values(slots.map(decode_i64)).with_timezone(UTC),
        ),
        LogicalType::String => {
            let mut builder =
                StringBuilder::with_capacity(buffer.rows(), buffer.rows() * INLINE_CAPACITY);
            for slot in slots {
                builder.append_value(decode_str(slot, snapshot)?);
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}
