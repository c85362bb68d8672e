//! Column schema discovered from the first row.
//!
//! The registrar records columns while row 1 is being written; once the row
//! is finished the schema is frozen into a `TableSchema` that never changes
//! for the rest of the file. The verifier checks later rows against it.

mod registrar;
mod verifier;

pub use registrar::{format_column_name, SchemaRegistrar};
pub use verifier::ColumnOrderVerifier;

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use thiserror::Error;

use crate::value::LogicalType;

/// Timezone attached to every timestamp column.
pub const UTC: &str = "UTC";

/// Errors about the set or order of columns.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("the first row has no fields")]
    EmptyRow,

    #[error(
        "cols expected: {expected}, columns got: {actual}, \
         missing from row: [{}], not in schema: [{}]",
        .missing_from_row.join(", "),
        .unexpected_in_row.join(", ")
    )]
    ColumnCount {
        expected: usize,
        actual: usize,
        missing_from_row: Vec<String>,
        unexpected_in_row: Vec<String>,
    },

    #[error("column[{index}] differs, expected: {expected}, actual: {actual}")]
    ColumnOrder {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("field '{column}' is past the last of {expected} schema columns")]
    TooManyFields { expected: usize, column: String },
}

/// A named, typed column at a fixed position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    logical_type: LogicalType,
    ordinal: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, logical_type: LogicalType, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            logical_type,
            ordinal,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn arrow_field(&self) -> Field {
        Field::new(&self.name, arrow_type(self.logical_type), false)
    }
}

/// The frozen, ordered column list of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    columns: Vec<Column>,
    positions: HashMap<String, usize>,
}

impl TableSchema {
    /// Build a schema from columns in write order.
    ///
    /// Ordinals are reassigned from position.
    pub fn new(
        columns: impl IntoIterator<Item = (String, LogicalType)>,
    ) -> Result<Self, SchemaError> {
        let mut out = Vec::new();
        let mut positions = HashMap::new();
        for (ordinal, (name, logical_type)) in columns.into_iter().enumerate() {
            if positions.insert(name.clone(), ordinal).is_some() {
                return Err(SchemaError::DuplicateColumn(name));
            }
            out.push(Column::new(name, logical_type, ordinal));
        }
        if out.is_empty() {
            return Err(SchemaError::EmptyRow);
        }
        Ok(Self {
            columns: out,
            positions,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, ordinal: usize) -> Option<&Column> {
        self.columns.get(ordinal)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name())
    }

    pub fn to_arrow(&self) -> Arc<Schema> {
        Arc::new(Schema::new(
            self.columns.iter().map(Column::arrow_field).collect::<Vec<_>>(),
        ))
    }
}

/// Arrow type used to store a logical column type.
pub fn arrow_type(logical_type: LogicalType) -> DataType {
    match logical_type {
        LogicalType::Int16 => DataType::Int16,
        LogicalType::Int32 => DataType::Int32,
        LogicalType::Int64 => DataType::Int64,
        LogicalType::Float32 => DataType::Float32,
        LogicalType::Float64 => DataType::Float64,
        LogicalType::Bool => DataType::Boolean,
        LogicalType::String => DataType::Utf8,
        LogicalType::Timestamp => DataType::Timestamp(TimeUnit::Nanosecond, Some(UTC.into())),
    }
}
