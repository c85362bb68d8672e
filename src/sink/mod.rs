//! Columnar sink abstraction.
//!
//! A sink receives finished row groups one column at a time, in schema
//! order. The writer opens it exactly once, after the schema is frozen, and
//! the flush worker is the only thing that ever touches it afterwards.

pub mod memory;
pub mod parquet;

use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::Schema;
use thiserror::Error;

use crate::schema::TableSchema;

/// Errors that can occur while opening or writing to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ::parquet::errors::ParquetError),

    #[error("file '{}' already exists", .0.display())]
    FileExists(PathBuf),

    #[error(
        "cannot append to '{}': existing schema {existing} does not match {incoming}",
        .path.display()
    )]
    SchemaMismatch {
        path: PathBuf,
        existing: String,
        incoming: String,
    },

    #[error("column {got} appended out of order, expected column {expected}")]
    ColumnOrder { expected: usize, got: usize },

    #[error("column {ordinal} has {got} rows, row group has {expected}")]
    RowCount {
        ordinal: usize,
        expected: usize,
        got: usize,
    },

    #[error("row group finished with {got} of {expected} columns")]
    IncompleteRowGroup { expected: usize, got: usize },

    #[error("sink failure: {0}")]
    Other(String),
}

/// Compression applied to every column chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Fast, moderate ratio.
    Snappy,
    /// Higher ratio at more CPU cost.
    #[default]
    Zstd,
}

/// What to do when the output file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Fail if the file exists.
    ErrorIfExists,
    /// Delete the existing file first.
    #[default]
    Overwrite,
    /// Keep the existing row groups and write new ones after them.
    Append,
}

/// Totals reported by a sink when it is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub row_groups: usize,
    pub rows: usize,
}

/// Opens a sink once the schema is known.
pub trait SinkFactory: Send {
    /// Short name for logs and the flush thread name.
    fn label(&self) -> String;

    /// Create the sink for `schema`. Called at most once.
    fn open(&mut self, schema: &TableSchema) -> Result<Box<dyn ColumnarSink>, SinkError>;
}

/// A destination for row groups.
pub trait ColumnarSink: Send {
    /// Start a new row group. It is written when the returned writer finishes.
    fn begin_row_group(&mut self) -> Result<Box<dyn RowGroupWriter + '_>, SinkError>;

    /// Finalize the output. Nothing may be written afterwards.
    fn close(self: Box<Self>) -> Result<SinkSummary, SinkError>;
}

/// Receives the columns of one row group.
pub trait RowGroupWriter {
    /// Append the values of column `ordinal`. Columns arrive in schema order.
    fn append_column(&mut self, ordinal: usize, values: ArrayRef) -> Result<(), SinkError>;

    /// Close the row group.
    fn finish(self: Box<Self>) -> Result<(), SinkError>;
}

/// Gathers the columns of a row group and checks order and lengths.
#[derive(Debug)]
pub(crate) struct ColumnCollector {
    schema: Arc<Schema>,
    columns: Vec<ArrayRef>,
}

impl ColumnCollector {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        let capacity = schema.fields().len();
        Self {
            schema,
            columns: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, ordinal: usize, values: ArrayRef) -> Result<(), SinkError> {
        if ordinal != self.columns.len() {
            return Err(SinkError::ColumnOrder {
                expected: self.columns.len(),
                got: ordinal,
            });
        }
        if let Some(first) = self.columns.first() {
            if first.len() != values.len() {
                return Err(SinkError::RowCount {
                    ordinal,
                    expected: first.len(),
                    got: values.len(),
                });
            }
        }
        self.columns.push(values);
        Ok(())
    }

    pub(crate) fn into_batch(self) -> Result<RecordBatch, SinkError> {
        let expected = self.schema.fields().len();
        if self.columns.len() != expected {
            return Err(SinkError::IncompleteRowGroup {
                expected,
                got: self.columns.len(),
            });
        }
        Ok(RecordBatch::try_new(self.schema, self.columns)?)
    }
}
