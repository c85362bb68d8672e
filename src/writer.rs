//! Row-at-a-time writer.
//!
//! Callers write one field at a time and finish each row with
//! [`RowWriter::next_record`]. The first row defines the columns: their
//! names, types and order. Rows are packed into a staging buffer; every
//! `records_per_row_group` rows the buffer is handed to the flush worker,
//! which writes it out as one row group.

use std::path::Path;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::flush::{FlushCoordinator, FlushError, FlushState};
use crate::schema::{
    format_column_name, ColumnOrderVerifier, SchemaError, SchemaRegistrar, TableSchema,
};
use crate::sink::parquet::ParquetSinkFactory;
use crate::sink::{Compression, SinkError, SinkFactory, WriteMode};
use crate::staging::slot::{classify, encode};
use crate::staging::{SlotError, StagingBuffer, StringDictionary, SLOT_WIDTH};
use crate::value::{FieldValue, LogicalType, TimestampKind};

/// Errors that can occur while writing rows.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("column '{column}': {kind} values are not supported")]
    UnsupportedType { column: String, kind: &'static str },

    #[error("column '{column}': value is null")]
    NullFieldValue { column: String },

    #[error("column '{column}': timestamp kind is {kind:?}, expected UTC")]
    InvalidTimestampKind { column: String, kind: TimestampKind },

    #[error("column '{column}': timestamp does not fit in 64-bit nanoseconds")]
    TimestampOutOfRange { column: String },

    #[error("column '{column}' is {expected}, got a {got} value")]
    ColumnTypeMismatch {
        column: String,
        expected: LogicalType,
        got: &'static str,
    },

    #[error("column '{column}': {source}")]
    Encode {
        column: String,
        #[source]
        source: SlotError,
    },

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("flush error: {0}")]
    Flush(#[from] FlushError),

    #[error("invalid writer options: {0}")]
    InvalidOptions(String),

    #[error("writer is closed")]
    Closed,

    #[error("writer failed earlier and cannot be used")]
    Failed,
}

impl WriterError {
    fn field(column: &str, source: SlotError) -> Self {
        let column = column.to_string();
        match source {
            SlotError::Null => WriterError::NullFieldValue { column },
            SlotError::TimestampKind(kind) => WriterError::InvalidTimestampKind { column, kind },
            SlotError::TimestampOutOfRange => WriterError::TimestampOutOfRange { column },
            SlotError::Unsupported(kind) => WriterError::UnsupportedType { column, kind },
            SlotError::TypeMismatch { expected, got } => {
                WriterError::ColumnTypeMismatch { column, expected, got }
            }
            source => WriterError::Encode { column, source },
        }
    }
}

/// Options for a [`RowWriter`].
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Rows per row group. Also the capacity of each staging buffer.
    pub records_per_row_group: usize,
    /// Compression for every column chunk.
    pub compression: Compression,
    /// How to handle an existing output file.
    pub write_mode: WriteMode,
    /// Check that every row writes the first row's columns in the same order.
    pub verify_column_order: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            records_per_row_group: 65_536,
            compression: Compression::Zstd,
            write_mode: WriteMode::Overwrite,
            verify_column_order: cfg!(debug_assertions),
        }
    }
}

impl WriterOptions {
    /// Options for appending row groups to an existing file.
    pub fn append() -> Self {
        Self {
            write_mode: WriteMode::Append,
            ..Default::default()
        }
    }

    /// Options that refuse to touch an existing file.
    pub fn create_new() -> Self {
        Self {
            write_mode: WriteMode::ErrorIfExists,
            ..Default::default()
        }
    }

    pub fn with_records_per_row_group(mut self, rows: usize) -> Self {
        self.records_per_row_group = rows;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_column_order = verify;
        self
    }

    fn validate(&self) -> Result<(), WriterError> {
        if self.records_per_row_group == 0 {
            return Err(WriterError::InvalidOptions(
                "records_per_row_group must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Statistics from a writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Complete rows written.
    pub rows: usize,
    /// Row groups written by this writer.
    pub row_groups: usize,
    /// Distinct strings longer than the inline limit.
    pub dictionary_entries: usize,
    /// Staging buffers allocated.
    pub buffers_allocated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    Closed,
    Failed,
}

/// Writes rows one field at a time into a columnar sink.
///
/// Dropping the writer closes it; use [`RowWriter::close`] to see errors.
pub struct RowWriter {
    factory: Box<dyn SinkFactory>,
    records_per_row_group: usize,
    flush: FlushCoordinator,
    /// Present until the first row is finished.
    registrar: Option<SchemaRegistrar>,
    schema: Option<TableSchema>,
    buffer: Option<StagingBuffer>,
    dictionary: StringDictionary,
    verifier: Option<ColumnOrderVerifier>,
    /// Fields written in the current row.
    cursor: usize,
    rows: usize,
    row_groups: usize,
    lifecycle: Lifecycle,
}

impl RowWriter {
    /// Create a writer for a Parquet file at `path`. The file is only
    /// created once the first row is finished.
    pub fn create(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self, WriterError> {
        options.validate()?;
        let factory =
            ParquetSinkFactory::new(path.as_ref(), options.compression, options.write_mode)
                .with_max_row_group_rows(options.records_per_row_group);
        Self::with_sink(Box::new(factory), options)
    }

    /// Create a writer that opens its sink through `factory`.
    pub fn with_sink(
        factory: Box<dyn SinkFactory>,
        options: WriterOptions,
    ) -> Result<Self, WriterError> {
        options.validate()?;
        let flush = FlushCoordinator::spawn(&factory.label())?;

        Ok(Self {
            factory,
            records_per_row_group: options.records_per_row_group,
            flush,
            registrar: Some(SchemaRegistrar::new()),
            schema: None,
            buffer: None,
            dictionary: StringDictionary::new(),
            verifier: options.verify_column_order.then(ColumnOrderVerifier::new),
            cursor: 0,
            rows: 0,
            row_groups: 0,
            lifecycle: Lifecycle::Open,
        })
    }

    /// The frozen schema, once the first row is finished.
    pub fn schema(&self) -> Option<&TableSchema> {
        self.schema.as_ref()
    }

    /// Complete rows accepted so far.
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn state(&self) -> FlushState {
        match self.lifecycle {
            Lifecycle::Failed => FlushState::Failed,
            _ => self.flush.state(),
        }
    }

    fn ensure_open(&self) -> Result<(), WriterError> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            Lifecycle::Closed => Err(WriterError::Closed),
            Lifecycle::Failed => Err(WriterError::Failed),
        }
    }

    /// Write the next field of the current row.
    ///
    /// A field that fails to write leaves the row as it was.
    pub fn write_field<'v>(
        &mut self,
        name: &str,
        value: impl Into<FieldValue<'v>>,
    ) -> Result<(), WriterError> {
        self.ensure_open()?;
        let value = value.into();

        if let Some(registrar) = self.registrar.as_mut() {
            let logical_type = classify(&value).map_err(|e| WriterError::field(name, e))?;
            registrar.register(name.to_string(), logical_type, value.into_owned())?;
            self.cursor += 1;
            return Ok(());
        }
        if let Err(e) = self.flush.check() {
            return Err(self.fail(e.into()));
        }

        let (Some(schema), Some(buffer)) = (self.schema.as_ref(), self.buffer.as_mut()) else {
            return Err(WriterError::Failed);
        };
        let ordinal = self.cursor;
        let Some(column) = schema.column(ordinal) else {
            return Err(SchemaError::TooManyFields {
                expected: schema.len(),
                column: name.to_string(),
            }
            .into());
        };

        let slot = encode(&value, column.logical_type(), &mut self.dictionary)
            .map_err(|e| WriterError::field(name, e))?;
        buffer.write_slot(ordinal, slot);
        if let Some(verifier) = self.verifier.as_mut() {
            verifier.record(name.to_string());
        }
        self.cursor += 1;
        Ok(())
    }

    /// Write a field whose name is `template` expanded with `index`.
    ///
    /// `{0}` is replaced everywhere, otherwise the first `{}`; a template
    /// without either gets `_{index}` appended.
    pub fn write_indexed_field<'v>(
        &mut self,
        template: &str,
        index: usize,
        value: impl Into<FieldValue<'v>>,
    ) -> Result<(), WriterError> {
        let name = format_column_name(template, index);
        self.write_field(&name, value)
    }

    /// Finish the current row.
    ///
    /// Finishing the first row freezes the schema and opens the sink. A row
    /// that fails column order verification is discarded.
    pub fn next_record(&mut self) -> Result<(), WriterError> {
        self.ensure_open()?;
        if let Err(e) = self.flush.check() {
            return Err(self.fail(e.into()));
        }

        if self.registrar.is_some() {
            return self.finish_first_row();
        }

        let Some(schema) = self.schema.as_ref() else {
            return Err(WriterError::Failed);
        };
        if let Some(verifier) = self.verifier.as_mut() {
            if let Err(e) = verifier.verify(schema) {
                self.cursor = 0;
                return Err(e.into());
            }
        }

        let columns = schema.len();
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(WriterError::Failed);
        };
        // Unverified short rows get zeroed slots for the missing columns.
        for ordinal in self.cursor..columns {
            buffer.write_slot(ordinal, [0; SLOT_WIDTH]);
        }
        buffer.commit_row();
        self.cursor = 0;
        self.rows += 1;
        self.flush_if_full()
    }

    fn finish_first_row(&mut self) -> Result<(), WriterError> {
        match self.registrar.as_ref() {
            Some(registrar) if registrar.is_empty() => return Err(SchemaError::EmptyRow.into()),
            Some(_) => {}
            None => return Err(WriterError::Failed),
        }
        let columns = self.registrar.as_ref().map_or(0, SchemaRegistrar::len);
        let buffer_bytes = self
            .records_per_row_group
            .checked_mul(columns)
            .and_then(|n| n.checked_mul(SLOT_WIDTH));
        if buffer_bytes.is_none() {
            return Err(self.fail(WriterError::InvalidOptions(format!(
                "{} rows of {columns} columns do not fit in a staging buffer",
                self.records_per_row_group
            ))));
        }

        let Some(registrar) = self.registrar.take() else {
            return Err(WriterError::Failed);
        };
        let (schema, values) = registrar.freeze()?;

        let sink = match self.factory.open(&schema) {
            Ok(sink) => sink,
            Err(e) => return Err(self.fail(e.into())),
        };
        info!(
            sink = %self.factory.label(),
            columns = schema.len(),
            rows_per_group = self.records_per_row_group,
            "schema frozen"
        );

        let mut buffer = match self.flush.open(sink, schema.clone(), self.records_per_row_group) {
            Ok(buffer) => buffer,
            Err(e) => return Err(self.fail(e.into())),
        };
        for (column, value) in schema.columns().iter().zip(&values) {
            let slot = match encode(value, column.logical_type(), &mut self.dictionary) {
                Ok(slot) => slot,
                Err(e) => return Err(self.fail(WriterError::field(column.name(), e))),
            };
            buffer.write_slot(column.ordinal(), slot);
        }
        buffer.commit_row();

        self.schema = Some(schema);
        self.buffer = Some(buffer);
        self.cursor = 0;
        self.rows = 1;
        self.flush_if_full()
    }

    fn flush_if_full(&mut self) -> Result<(), WriterError> {
        if !self.buffer.as_ref().is_some_and(StagingBuffer::is_full) {
            return Ok(());
        }
        let Some(buffer) = self.buffer.take() else {
            return Ok(());
        };
        let snapshot = self.dictionary.snapshot();
        match self.flush.hand_off(buffer, snapshot) {
            Ok(next) => {
                self.buffer = Some(next);
                self.row_groups += 1;
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    fn fail(&mut self, error: WriterError) -> WriterError {
        self.lifecycle = Lifecycle::Failed;
        self.buffer = None;
        error
    }

    fn stats(&self) -> WriteStats {
        WriteStats {
            rows: self.rows,
            row_groups: self.row_groups,
            dictionary_entries: self.dictionary.len(),
            buffers_allocated: self.flush.buffers_allocated(),
        }
    }

    /// Flush buffered rows, close the sink and wait for the worker.
    ///
    /// Closing again returns the same statistics. A writer that already
    /// reported a failure closes without error.
    pub fn close(&mut self) -> Result<WriteStats, WriterError> {
        match self.lifecycle {
            Lifecycle::Closed | Lifecycle::Failed => return Ok(self.stats()),
            Lifecycle::Open => {}
        }

        if self.cursor > 0 {
            warn!(fields = self.cursor, "discarding incomplete row on close");
            self.cursor = 0;
        }

        let remaining = self
            .buffer
            .take()
            .map(|buffer| (buffer, self.dictionary.snapshot()));
        match self.flush.shutdown(remaining) {
            Ok(summary) => {
                self.row_groups = summary.row_groups;
                self.lifecycle = Lifecycle::Closed;
                Ok(self.stats())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }
}

impl Drop for RowWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(sink = %self.factory.label(), "failed to close writer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::memory::{MemorySinkFactory, MemoryTable};
    use crate::sink::parquet::{inspect, read_all};
    use crate::sink::{ColumnarSink, RowGroupWriter, SinkSummary};
    use crate::value::Timestamp;
    use arrow::array::{Array, ArrayRef, AsArray};
    use arrow::datatypes::{
        DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, TimeUnit,
        TimestampNanosecondType,
    };
    use chrono::{DateTime, Local, NaiveDate, Utc};
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use rust_decimal::Decimal;
    use std::fs::File;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    const BASE_NANOS: i64 = 1_700_000_000_123_456_789;

    fn long_string(i: usize) -> String {
        format!("a longer string value number {}", i % 5)
    }

    fn write_mixed_row(writer: &mut RowWriter, i: usize) -> Result<(), WriterError> {
        writer.write_field("float", i as f32 * 0.25 + 0.1)?;
        writer.write_field("double", i as f64 / 7.0)?;
        writer.write_field("int", i as i32 - 50)?;
        writer.write_field("long", (i as i64) << 33)?;
        writer.write_field("short", (i % 300) as i16)?;
        if i % 2 == 0 {
            writer.write_field("string", format!("s{i}"))?;
        } else {
            writer.write_field("string", long_string(i))?;
        }
        writer.write_field("bool", i % 3 == 0)?;
        writer.write_field("datetime", Timestamp::from_utc_nanos(BASE_NANOS + i as i64 * 1_001))?;
        for k in 0..5 {
            writer.write_indexed_field("multiple_{0}", k, (i * 10 + k) as i64)?;
        }
        writer.next_record()
    }

    fn memory_writer(rows_per_group: usize, verify: bool) -> (RowWriter, MemoryTable) {
        let factory = MemorySinkFactory::new("mem");
        let table = factory.table();
        let options = WriterOptions::default()
            .with_records_per_row_group(rows_per_group)
            .with_verification(verify);
        (RowWriter::with_sink(Box::new(factory), options).unwrap(), table)
    }

    #[test]
    fn test_end_to_end_parquet_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.parquet");
        let options = WriterOptions::default()
            .with_records_per_row_group(64)
            .with_verification(true);

        let mut writer = RowWriter::create(&path, options).unwrap();
        for i in 0..130 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        let stats = writer.close().unwrap();
        assert_eq!(stats.rows, 130);
        assert_eq!(stats.row_groups, 3);
        assert_eq!(stats.dictionary_entries, 5);
        assert!(stats.buffers_allocated <= 2);

        let report = inspect(&path).unwrap();
        assert_eq!(report.row_groups, vec![64, 64, 2]);
        assert_eq!(report.rows, 130);
        let names: Vec<&str> = report.schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec![
                "float", "double", "int", "long", "short", "string", "bool", "datetime",
                "multiple_0", "multiple_1", "multiple_2", "multiple_3", "multiple_4"
            ]
        );
        assert_eq!(
            report.schema.field(7).data_type(),
            &DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into()))
        );

        let batch = read_all(&path).unwrap();
        assert_eq!(batch.num_rows(), 130);
        let floats = batch.column(0).as_primitive::<Float32Type>();
        let doubles = batch.column(1).as_primitive::<Float64Type>();
        let ints = batch.column(2).as_primitive::<Int32Type>();
        let longs = batch.column(3).as_primitive::<Int64Type>();
        let shorts = batch.column(4).as_primitive::<Int16Type>();
        let strings = batch.column(5).as_string::<i32>();
        let bools = batch.column(6).as_boolean();
        let times = batch.column(7).as_primitive::<TimestampNanosecondType>();
        for i in 0..130 {
            assert_eq!(floats.value(i).to_bits(), (i as f32 * 0.25 + 0.1).to_bits());
            assert_eq!(doubles.value(i).to_bits(), (i as f64 / 7.0).to_bits());
            assert_eq!(ints.value(i), i as i32 - 50);
            assert_eq!(longs.value(i), (i as i64) << 33);
            assert_eq!(shorts.value(i), (i % 300) as i16);
            if i % 2 == 0 {
                assert_eq!(strings.value(i), format!("s{i}"));
            } else {
                assert_eq!(strings.value(i), long_string(i));
            }
            assert_eq!(bools.value(i), i % 3 == 0);
            assert_eq!(times.value(i), BASE_NANOS + i as i64 * 1_001);
            for k in 0..5 {
                let multiple = batch.column(8 + k).as_primitive::<Int64Type>();
                assert_eq!(multiple.value(i), (i * 10 + k) as i64);
            }
        }
    }

    #[test]
    fn test_exact_multiple_has_no_empty_trailing_group() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exact.parquet");
        let options = WriterOptions::default().with_records_per_row_group(64);
        let mut writer = RowWriter::create(&path, options).unwrap();
        for i in 0..128 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        writer.close().unwrap();
        assert_eq!(inspect(&path).unwrap().row_groups, vec![64, 64]);
    }

    #[test]
    fn test_float_columns_skip_dictionary_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("floats.parquet");
        let mut writer = RowWriter::create(&path, WriterOptions::default()).unwrap();
        for i in 0..10 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        writer.close().unwrap();

        let reader = SerializedFileReader::new(File::open(&path).unwrap()).unwrap();
        let rg = reader.metadata().row_group(0);
        assert!(rg.column(0).dictionary_page_offset().is_none());
        assert!(rg.column(1).dictionary_page_offset().is_none());
    }

    #[test]
    fn test_zero_rows_creates_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let mut writer = RowWriter::create(&path, WriterOptions::default()).unwrap();
        let stats = writer.close().unwrap();

        assert_eq!(stats, WriteStats::default());
        assert_eq!(writer.state(), FlushState::Drained);
        assert!(!path.exists());
    }

    #[test]
    fn test_unfinished_first_row_creates_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.parquet");
        let mut writer = RowWriter::create(&path, WriterOptions::default()).unwrap();
        writer.write_field("a", 1i32).unwrap();
        writer.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_close_twice_is_a_no_op() {
        let (mut writer, table) = memory_writer(4, true);
        for i in 0..5 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        let first = writer.close().unwrap();
        let second = writer.close().unwrap();
        assert_eq!(first, second);
        assert_eq!(table.row_group_sizes(), vec![4, 1]);
        assert!(matches!(writer.write_field("float", 1.0f32), Err(WriterError::Closed)));
    }

    #[test]
    fn test_drop_closes_the_sink() {
        let (mut writer, table) = memory_writer(8, true);
        for i in 0..3 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        drop(writer);
        assert!(table.is_closed());
        assert_eq!(table.rows(), 3);
    }

    #[test]
    fn test_trailing_incomplete_row_is_discarded() {
        let (mut writer, table) = memory_writer(8, true);
        write_mixed_row(&mut writer, 0).unwrap();
        writer.write_field("float", 2.0f32).unwrap();
        let stats = writer.close().unwrap();
        assert_eq!(stats.rows, 1);
        assert_eq!(table.rows(), 1);
    }

    #[test]
    fn test_duplicate_column_leaves_schema_unchanged() {
        let (mut writer, _table) = memory_writer(8, true);
        writer.write_field("a", 1i32).unwrap();
        let err = writer.write_field("a", 2i64).unwrap_err();
        assert!(matches!(
            err,
            WriterError::Schema(SchemaError::DuplicateColumn(ref c)) if c == "a"
        ));

        writer.write_field("b", "x").unwrap();
        writer.next_record().unwrap();
        let schema = writer.schema().unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(schema.column(0).unwrap().logical_type(), LogicalType::Int32);
    }

    #[test]
    fn test_non_utc_timestamp_rejected_without_partial_row() {
        let (mut writer, table) = memory_writer(8, true);
        writer.write_field("id", 1i64).unwrap();
        writer.write_field("at", Timestamp::from_utc_nanos(0)).unwrap();
        writer.next_record().unwrap();

        writer.write_field("id", 2i64).unwrap();
        let local: DateTime<Local> = Local::now();
        let err = writer.write_field("at", local).unwrap_err();
        assert!(matches!(
            err,
            WriterError::InvalidTimestampKind {
                ref column,
                kind: TimestampKind::Local,
            } if column == "at"
        ));

        let naive = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let err = writer.write_field("at", naive).unwrap_err();
        assert!(matches!(
            err,
            WriterError::InvalidTimestampKind { kind: TimestampKind::Unspecified, .. }
        ));

        let utc: DateTime<Utc> = naive.and_utc();
        writer.write_field("at", utc).unwrap();
        writer.next_record().unwrap();
        writer.close().unwrap();

        let groups = table.row_groups();
        let at = groups[0].column(1).as_primitive::<TimestampNanosecondType>();
        assert_eq!(at.value(1), utc.timestamp_nanos_opt().unwrap());
    }

    #[test]
    fn test_non_utc_timestamp_in_first_row_rejected() {
        let (mut writer, _table) = memory_writer(8, true);
        let err = writer.write_field("at", Local::now()).unwrap_err();
        assert!(matches!(err, WriterError::InvalidTimestampKind { .. }));
        writer.write_field("id", 1i32).unwrap();
        writer.next_record().unwrap();
        assert_eq!(writer.schema().unwrap().len(), 1);
    }

    #[test]
    fn test_verification_rejects_missing_and_reordered_columns() {
        let (mut writer, table) = memory_writer(8, true);
        writer.write_field("a", 1i32).unwrap();
        writer.write_field("b", 2i32).unwrap();
        writer.write_field("c", 3i32).unwrap();
        writer.next_record().unwrap();

        writer.write_field("a", 1i32).unwrap();
        writer.write_field("b", 2i32).unwrap();
        let err = writer.next_record().unwrap_err();
        match err {
            WriterError::Schema(SchemaError::ColumnCount {
                expected,
                actual,
                missing_from_row,
                ..
            }) => {
                assert_eq!((expected, actual), (3, 2));
                assert_eq!(missing_from_row, vec!["c".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        writer.write_field("a", 1i32).unwrap();
        writer.write_field("c", 3i32).unwrap();
        writer.write_field("b", 2i32).unwrap();
        let err = writer.next_record().unwrap_err();
        assert!(matches!(
            err,
            WriterError::Schema(SchemaError::ColumnOrder { index: 1, .. })
        ));

        // a good row is still accepted afterwards
        writer.write_field("a", 4i32).unwrap();
        writer.write_field("b", 5i32).unwrap();
        writer.write_field("c", 6i32).unwrap();
        writer.next_record().unwrap();
        writer.close().unwrap();
        assert_eq!(table.rows(), 2);
    }

    #[test]
    fn test_without_verification_misuse_is_not_reported() {
        let (mut writer, table) = memory_writer(8, false);
        writer.write_field("a", 1i32).unwrap();
        writer.write_field("b", 2i32).unwrap();
        writer.next_record().unwrap();

        // names are not checked, only positions and types
        writer.write_field("b", 10i32).unwrap();
        writer.write_field("a", 20i32).unwrap();
        writer.next_record().unwrap();

        writer.write_field("a", 30i32).unwrap();
        writer.next_record().unwrap();
        writer.close().unwrap();

        let groups = table.row_groups();
        let a = groups[0].column(0).as_primitive::<Int32Type>();
        let b = groups[0].column(1).as_primitive::<Int32Type>();
        assert_eq!(a.values().to_vec(), vec![1, 10, 30]);
        assert_eq!(b.values().to_vec(), vec![2, 20, 0]);
    }

    #[test]
    fn test_too_many_fields_and_type_mismatch() {
        let (mut writer, _table) = memory_writer(8, false);
        writer.write_field("a", 1i32).unwrap();
        writer.next_record().unwrap();

        let err = writer.write_field("a", "text").unwrap_err();
        assert!(matches!(
            err,
            WriterError::ColumnTypeMismatch { expected: LogicalType::Int32, got: "string", .. }
        ));
        writer.write_field("a", 2i32).unwrap();
        let err = writer.write_field("b", 3i32).unwrap_err();
        assert!(matches!(
            err,
            WriterError::Schema(SchemaError::TooManyFields { expected: 1, .. })
        ));
        writer.next_record().unwrap();
        assert_eq!(writer.rows_written(), 2);
    }

    #[test]
    fn test_unsupported_and_null_values() {
        let (mut writer, _table) = memory_writer(8, true);
        let err = writer.write_field("big", 7u64).unwrap_err();
        assert!(matches!(err, WriterError::UnsupportedType { kind: "uint64", .. }));
        let err = writer.write_field("blob", vec![1u8, 2]).unwrap_err();
        assert!(matches!(err, WriterError::UnsupportedType { kind: "binary", .. }));
        let err = writer.write_field("maybe", None::<i32>).unwrap_err();
        assert!(matches!(err, WriterError::NullFieldValue { ref column } if column == "maybe"));
    }

    #[test]
    fn test_decimal_is_stored_as_double() {
        let (mut writer, table) = memory_writer(8, true);
        writer.write_field("price", Decimal::new(12345, 2)).unwrap();
        writer.next_record().unwrap();
        writer.write_field("price", 1.5f64).unwrap();
        writer.next_record().unwrap();
        writer.close().unwrap();

        let groups = table.row_groups();
        assert_eq!(groups[0].schema().field(0).data_type(), &DataType::Float64);
        let price = groups[0].column(0).as_primitive::<Float64Type>();
        assert!((price.value(0) - 123.45).abs() < 1e-12);
        assert_eq!(price.value(1), 1.5);
    }

    #[test]
    fn test_empty_first_row_rejected() {
        let (mut writer, _table) = memory_writer(8, true);
        assert!(matches!(
            writer.next_record(),
            Err(WriterError::Schema(SchemaError::EmptyRow))
        ));
        writer.write_field("a", true).unwrap();
        writer.next_record().unwrap();
    }

    #[test]
    fn test_invalid_options() {
        let factory = MemorySinkFactory::new("mem");
        let options = WriterOptions::default().with_records_per_row_group(0);
        assert!(matches!(
            RowWriter::with_sink(Box::new(factory), options),
            Err(WriterError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_oversized_row_group_rejected() {
        let factory = MemorySinkFactory::new("mem");
        let table = factory.table();
        let options = WriterOptions::default().with_records_per_row_group(usize::MAX / 4);
        let mut writer = RowWriter::with_sink(Box::new(factory), options).unwrap();

        writer.write_field("a", 1i32).unwrap();
        writer.write_field("b", 2i32).unwrap();
        assert!(matches!(
            writer.next_record(),
            Err(WriterError::InvalidOptions(_))
        ));
        assert!(matches!(writer.write_field("a", 3i32), Err(WriterError::Failed)));
        assert!(writer.close().is_ok());
        assert!(table.schema().is_none());
    }

    #[test]
    fn test_row_group_of_one_row() {
        let (mut writer, table) = memory_writer(1, true);
        for i in 0..3 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        let stats = writer.close().unwrap();
        assert_eq!(stats.row_groups, 3);
        assert_eq!(table.row_group_sizes(), vec![1, 1, 1]);
    }

    #[test]
    fn test_memory_pipeline_keeps_order_and_two_buffers() {
        let (mut writer, table) = memory_writer(16, true);
        for i in 0..1000 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        let stats = writer.close().unwrap();
        assert_eq!(stats.row_groups, 63);
        assert!(stats.buffers_allocated <= 2);

        let sizes = table.row_group_sizes();
        assert_eq!(sizes.len(), 63);
        assert_eq!(sizes.iter().sum::<usize>(), 1000);
        assert_eq!(*sizes.last().unwrap(), 1000 % 16);

        let ints: Vec<i32> = table
            .row_groups()
            .iter()
            .flat_map(|b| b.column(2).as_primitive::<Int32Type>().values().to_vec())
            .collect();
        assert_eq!(ints, (0..1000).map(|i| i - 50).collect::<Vec<_>>());
    }

    #[test]
    fn test_append_mode_extends_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("append.parquet");

        let options = WriterOptions::default().with_records_per_row_group(4);
        let mut writer = RowWriter::create(&path, options).unwrap();
        for i in 0..6 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        writer.close().unwrap();

        let options = WriterOptions::append().with_records_per_row_group(4);
        let mut writer = RowWriter::create(&path, options).unwrap();
        for i in 6..9 {
            write_mixed_row(&mut writer, i).unwrap();
        }
        // the existing file is only replaced on close
        assert_eq!(inspect(&path).unwrap().row_groups, vec![4, 2]);
        let stats = writer.close().unwrap();
        assert_eq!(stats.row_groups, 1);

        assert_eq!(inspect(&path).unwrap().row_groups, vec![4, 2, 3]);
        let batch = read_all(&path).unwrap();
        let ints = batch.column(2).as_primitive::<Int32Type>();
        assert_eq!(ints.values().to_vec(), (0..9).map(|i| i - 50).collect::<Vec<_>>());
    }

    #[test]
    fn test_error_if_exists_fails_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taken.parquet");
        std::fs::write(&path, b"keep me").unwrap();

        let mut writer = RowWriter::create(&path, WriterOptions::create_new()).unwrap();
        writer.write_field("a", 1i32).unwrap();
        let err = writer.next_record().unwrap_err();
        assert!(matches!(err, WriterError::Sink(SinkError::FileExists(_))));
        assert_eq!(writer.state(), FlushState::Failed);
        assert!(matches!(writer.write_field("a", 1i32), Err(WriterError::Failed)));
        writer.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_overwrite_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("replace.parquet");
        std::fs::write(&path, b"old").unwrap();

        let mut writer = RowWriter::create(&path, WriterOptions::default()).unwrap();
        write_mixed_row(&mut writer, 0).unwrap();
        writer.close().unwrap();
        assert_eq!(inspect(&path).unwrap().rows, 1);
    }

    struct BrokenFactory;

    struct BrokenSink;

    struct BrokenGroup;

    impl SinkFactory for BrokenFactory {
        fn label(&self) -> String {
            "broken".to_string()
        }

        fn open(&mut self, _schema: &TableSchema) -> Result<Box<dyn ColumnarSink>, SinkError> {
            Ok(Box::new(BrokenSink))
        }
    }

    impl ColumnarSink for BrokenSink {
        fn begin_row_group(&mut self) -> Result<Box<dyn RowGroupWriter + '_>, SinkError> {
            Ok(Box::new(BrokenGroup))
        }

        fn close(self: Box<Self>) -> Result<SinkSummary, SinkError> {
            Ok(SinkSummary::default())
        }
    }

    impl RowGroupWriter for BrokenGroup {
        fn append_column(&mut self, _ordinal: usize, _values: ArrayRef) -> Result<(), SinkError> {
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<(), SinkError> {
            Err(SinkError::Other("device unplugged".to_string()))
        }
    }

    #[test]
    fn test_worker_failure_reaches_producer() {
        let options = WriterOptions::default().with_records_per_row_group(2);
        let mut writer = RowWriter::with_sink(Box::new(BrokenFactory), options).unwrap();

        let mut failure = None;
        for i in 0..100 {
            if let Err(e) = write_mixed_row(&mut writer, i) {
                failure = Some(e);
                break;
            }
        }
        let err = match failure {
            Some(e) => e,
            None => writer.close().unwrap_err(),
        };
        assert!(
            matches!(err, WriterError::Flush(FlushError::Sink { sequence: 0, .. })),
            "{err:?}"
        );
        assert_eq!(writer.state(), FlushState::Failed);
        assert!(matches!(writer.next_record(), Err(WriterError::Failed)));
        assert!(writer.close().is_ok());
    }

    #[test]
    fn test_worker_failure_reaches_write_field() {
        let options = WriterOptions::default().with_records_per_row_group(1);
        let mut writer = RowWriter::with_sink(Box::new(BrokenFactory), options).unwrap();
        writer.write_field("a", 0i32).unwrap();
        writer.next_record().unwrap();

        // Only write_field is called from here on, so the failure of the
        // first row group must surface through it.
        let mut failure = None;
        for i in 0..400 {
            match writer.write_field("a", i) {
                Ok(()) | Err(WriterError::Schema(SchemaError::TooManyFields { .. })) => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let err = failure.unwrap();
        assert!(
            matches!(err, WriterError::Flush(FlushError::Sink { sequence: 0, .. })),
            "{err:?}"
        );
        assert_eq!(writer.state(), FlushState::Failed);
        assert!(matches!(writer.write_field("a", 1i32), Err(WriterError::Failed)));
    }

    struct GatedFactory {
        inner: MemorySinkFactory,
        gate: Option<Receiver<()>>,
    }

    struct GatedSink {
        inner: Box<dyn ColumnarSink>,
        gate: Receiver<()>,
    }

    impl SinkFactory for GatedFactory {
        fn label(&self) -> String {
            "gated".to_string()
        }

        fn open(&mut self, schema: &TableSchema) -> Result<Box<dyn ColumnarSink>, SinkError> {
            let gate = self
                .gate
                .take()
                .ok_or_else(|| SinkError::Other("opened twice".to_string()))?;
            Ok(Box::new(GatedSink {
                inner: self.inner.open(schema)?,
                gate,
            }))
        }
    }

    impl ColumnarSink for GatedSink {
        fn begin_row_group(&mut self) -> Result<Box<dyn RowGroupWriter + '_>, SinkError> {
            self.gate
                .recv()
                .map_err(|_| SinkError::Other("gate dropped".to_string()))?;
            self.inner.begin_row_group()
        }

        fn close(self: Box<Self>) -> Result<SinkSummary, SinkError> {
            self.inner.close()
        }
    }

    #[test]
    fn test_producer_blocks_while_worker_is_busy() {
        let inner = MemorySinkFactory::new("gated");
        let table = inner.table();
        let (open_gate, gate) = mpsc::channel();
        let progress = Arc::new(AtomicUsize::new(0));

        let producer = {
            let progress = progress.clone();
            thread::spawn(move || {
                let factory = GatedFactory {
                    inner,
                    gate: Some(gate),
                };
                let options = WriterOptions::default().with_records_per_row_group(2);
                let mut writer = RowWriter::with_sink(Box::new(factory), options).unwrap();
                for i in 0..6 {
                    write_mixed_row(&mut writer, i).unwrap();
                    progress.store(i + 1, Ordering::SeqCst);
                }
                writer.close().unwrap()
            })
        };

        // The worker holds group 1 at the gate, so the handoff of group 2
        // (after row 4) cannot complete.
        thread::sleep(Duration::from_millis(200));
        assert!(progress.load(Ordering::SeqCst) <= 3);
        assert_eq!(table.rows(), 0);

        for _ in 0..3 {
            open_gate.send(()).unwrap();
        }
        let stats = producer.join().unwrap();
        assert_eq!(stats.rows, 6);
        assert!(stats.buffers_allocated <= 2);
        assert_eq!(table.row_group_sizes(), vec![2, 2, 2]);
    }

    #[test]
    fn test_schema_column_types_from_first_row() {
        let (mut writer, table) = memory_writer(8, true);
        write_mixed_row(&mut writer, 0).unwrap();
        writer.close().unwrap();

        let schema = table.schema().unwrap();
        let types: Vec<&DataType> = schema.fields().iter().map(|f| f.data_type()).collect();
        assert_eq!(types[0], &DataType::Float32);
        assert_eq!(types[4], &DataType::Int16);
        assert_eq!(types[5], &DataType::Utf8);
        assert_eq!(types[6], &DataType::Boolean);
        assert!(schema.fields().iter().all(|f| !f.is_nullable()));
        let batch = &table.row_groups()[0];
        assert_eq!(batch.column(5).len(), 1);
    }
}
