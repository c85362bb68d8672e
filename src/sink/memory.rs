//! In-memory sink, mostly for tests and embedding.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arrow::array::{ArrayRef, RecordBatch};
use arrow::datatypes::Schema;

use super::{ColumnCollector, ColumnarSink, RowGroupWriter, SinkError, SinkFactory, SinkSummary};
use crate::schema::TableSchema;

#[derive(Debug, Default)]
struct TableState {
    schema: Option<Arc<Schema>>,
    row_groups: Vec<RecordBatch>,
    closed: bool,
}

/// Shared handle to the row groups written through a [`MemorySinkFactory`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    state: Arc<Mutex<TableState>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schema the sink was opened with, if it was opened.
    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.lock().schema.clone()
    }

    pub fn row_groups(&self) -> Vec<RecordBatch> {
        self.lock().row_groups.clone()
    }

    /// Row count of each row group, in write order.
    pub fn row_group_sizes(&self) -> Vec<usize> {
        self.lock().row_groups.iter().map(RecordBatch::num_rows).collect()
    }

    pub fn rows(&self) -> usize {
        self.lock().row_groups.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn is_opened(&self) -> bool {
        self.lock().schema.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Opens sinks that append into a [`MemoryTable`].
#[derive(Debug, Clone)]
pub struct MemorySinkFactory {
    label: String,
    table: MemoryTable,
}

impl MemorySinkFactory {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            table: MemoryTable::new(),
        }
    }

    /// Handle for reading back what was written.
    pub fn table(&self) -> MemoryTable {
        self.table.clone()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn open(&mut self, schema: &TableSchema) -> Result<Box<dyn ColumnarSink>, SinkError> {
        let arrow_schema = schema.to_arrow();
        {
            let mut state = self.table.lock();
            if state.schema.is_some() {
                return Err(SinkError::Other(format!("sink '{}' opened twice", self.label)));
            }
            state.schema = Some(arrow_schema.clone());
        }
        Ok(Box::new(MemorySink {
            schema: arrow_schema,
            table: self.table.clone(),
        }))
    }
}

pub struct MemorySink {
    schema: Arc<Schema>,
    table: MemoryTable,
}

impl ColumnarSink for MemorySink {
    fn begin_row_group(&mut self) -> Result<Box<dyn RowGroupWriter + '_>, SinkError> {
        Ok(Box::new(MemoryRowGroup {
            table: &self.table,
            columns: ColumnCollector::new(self.schema.clone()),
        }))
    }

    fn close(self: Box<Self>) -> Result<SinkSummary, SinkError> {
        let mut state = self.table.lock();
        state.closed = true;
        Ok(SinkSummary {
            row_groups: state.row_groups.len(),
            rows: state.row_groups.iter().map(RecordBatch::num_rows).sum(),
        })
    }
}

struct MemoryRowGroup<'a> {
    table: &'a MemoryTable,
    columns: ColumnCollector,
}

impl RowGroupWriter for MemoryRowGroup<'_> {
    fn append_column(&mut self, ordinal: usize, values: ArrayRef) -> Result<(), SinkError> {
        self.columns.push(ordinal, values)
    }

    fn finish(self: Box<Self>) -> Result<(), SinkError> {
        let batch = self.columns.into_batch()?;
        if batch.num_rows() > 0 {
            self.table.lock().row_groups.push(batch);
        }
        Ok(())
    }
}
