//! Parquet sink implementation.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::compute::concat_batches;
use arrow::datatypes::Schema;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::schema::types::ColumnPath;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::{
    ColumnCollector, ColumnarSink, Compression, RowGroupWriter, SinkError, SinkFactory,
    SinkSummary, WriteMode,
};
use crate::schema::TableSchema;

impl From<Compression> for ParquetCompression {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Snappy => ParquetCompression::SNAPPY,
            Compression::Zstd => ParquetCompression::ZSTD(ZstdLevel::default()),
        }
    }
}

/// Opens a Parquet file at a fixed path once the schema is known.
///
/// Rows are written to a temporary file in the same directory, which
/// replaces the target only when the sink is closed. A sink dropped without
/// closing leaves the target as it was.
#[derive(Debug, Clone)]
pub struct ParquetSinkFactory {
    path: PathBuf,
    compression: Compression,
    write_mode: WriteMode,
    max_row_group_rows: usize,
}

impl ParquetSinkFactory {
    pub fn new(path: impl Into<PathBuf>, compression: Compression, write_mode: WriteMode) -> Self {
        Self {
            path: path.into(),
            compression,
            write_mode,
            max_row_group_rows: 1024 * 1024,
        }
    }

    /// Largest row group the writer may emit. Row groups handed to the sink
    /// must not exceed it or the Parquet writer would split them.
    pub fn with_max_row_group_rows(mut self, rows: usize) -> Self {
        self.max_row_group_rows = rows.max(1);
        self
    }
}

impl SinkFactory for ParquetSinkFactory {
    fn label(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "parquet".to_string())
    }

    fn open(&mut self, schema: &TableSchema) -> Result<Box<dyn ColumnarSink>, SinkError> {
        let arrow_schema = schema.to_arrow();

        let mut existing = Vec::new();
        if self.path.exists() {
            match self.write_mode {
                WriteMode::ErrorIfExists => return Err(SinkError::FileExists(self.path.clone())),
                WriteMode::Overwrite => {
                    info!(path = %self.path.display(), "deleting file as we are rewriting it");
                    fs::remove_file(&self.path)?;
                }
                WriteMode::Append => {
                    existing = existing_row_groups(&self.path, &arrow_schema)?;
                    info!(
                        path = %self.path.display(),
                        row_groups = existing.len(),
                        "appending after existing row groups"
                    );
                }
            }
        }

        let max_rows = existing
            .iter()
            .copied()
            .fold(self.max_row_group_rows, usize::max);
        let props = writer_properties(schema, self.compression, max_rows);

        let staged = tempfile::Builder::new()
            .prefix(".rowquet-")
            .suffix(".parquet.tmp")
            .tempfile_in(parent_dir(&self.path))?;
        let mut writer = ArrowWriter::try_new(staged, arrow_schema.clone(), Some(props))?;

        // Copy the old row groups one at a time so only one is ever in memory.
        let mut summary = SinkSummary::default();
        for (index, rows) in existing.into_iter().enumerate() {
            if rows == 0 {
                continue;
            }
            let batch = read_row_group(&self.path, index, rows, &arrow_schema)?;
            writer.write(&batch)?;
            writer.flush()?;
            summary.row_groups += 1;
            summary.rows += rows;
        }

        info!(
            path = %self.path.display(),
            columns = schema.len(),
            compression = ?self.compression,
            "opened parquet sink"
        );

        Ok(Box::new(ParquetSink {
            writer,
            schema: arrow_schema,
            path: self.path.clone(),
            replace_existing: self.write_mode != WriteMode::ErrorIfExists,
            summary,
        }))
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn writer_properties(
    schema: &TableSchema,
    compression: Compression,
    max_rows: usize,
) -> WriterProperties {
    let mut builder = WriterProperties::builder()
        .set_compression(compression.into())
        .set_max_row_group_size(max_rows);

    for column in schema.columns() {
        if column.logical_type().is_floating() {
            builder =
                builder.set_column_dictionary_enabled(ColumnPath::from(column.name()), false);
        }
    }
    builder.build()
}

/// Row counts of the row groups in an existing file, after checking that
/// its fields match `expected`.
fn existing_row_groups(path: &Path, expected: &Arc<Schema>) -> Result<Vec<usize>, SinkError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let existing = builder.schema();
    if existing.fields() != expected.fields() {
        return Err(SinkError::SchemaMismatch {
            path: path.to_path_buf(),
            existing: describe_fields(existing),
            incoming: describe_fields(expected),
        });
    }

    Ok(builder
        .metadata()
        .row_groups()
        .iter()
        .map(|rg| rg.num_rows() as usize)
        .collect())
}

/// Read one row group of an existing file as a single batch.
fn read_row_group(
    path: &Path,
    index: usize,
    rows: usize,
    expected: &Arc<Schema>,
) -> Result<RecordBatch, SinkError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let existing = builder.schema().clone();
    let reader = builder
        .with_row_groups(vec![index])
        .with_batch_size(rows)
        .build()?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let merged = concat_batches(&existing, &batches)?;
    // Rebind to the writer's schema so the batch carries no reader metadata.
    let columns: Vec<ArrayRef> = merged.columns().to_vec();
    Ok(RecordBatch::try_new(expected.clone(), columns)?)
}

fn describe_fields(schema: &Schema) -> String {
    let fields: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| format!("{}: {}", f.name(), f.data_type()))
        .collect();
    format!("[{}]", fields.join(", "))
}

/// Writes row groups to a Parquet file.
pub struct ParquetSink {
    writer: ArrowWriter<NamedTempFile>,
    schema: Arc<Schema>,
    path: PathBuf,
    replace_existing: bool,
    summary: SinkSummary,
}

impl ColumnarSink for ParquetSink {
    fn begin_row_group(&mut self) -> Result<Box<dyn RowGroupWriter + '_>, SinkError> {
        let columns = ColumnCollector::new(self.schema.clone());
        Ok(Box::new(ParquetRowGroup { sink: self, columns }))
    }

    fn close(self: Box<Self>) -> Result<SinkSummary, SinkError> {
        let ParquetSink {
            writer,
            path,
            replace_existing,
            summary,
            ..
        } = *self;
        let staged = writer.into_inner()?;
        staged.as_file().sync_all()?;
        let persisted = if replace_existing {
            staged.persist(&path)
        } else {
            staged.persist_noclobber(&path)
        };
        persisted.map_err(|e| e.error)?;

        info!(
            path = %path.display(),
            row_groups = summary.row_groups,
            rows = summary.rows,
            "closed parquet sink"
        );
        Ok(summary)
    }
}

struct ParquetRowGroup<'a> {
    sink: &'a mut ParquetSink,
    columns: ColumnCollector,
}

impl RowGroupWriter for ParquetRowGroup<'_> {
    fn append_column(&mut self, ordinal: usize, values: ArrayRef) -> Result<(), SinkError> {
        self.columns.push(ordinal, values)
    }

    fn finish(self: Box<Self>) -> Result<(), SinkError> {
        let ParquetRowGroup { sink, columns } = *self;
        let batch = columns.into_batch()?;
        if batch.num_rows() == 0 {
            return Ok(());
        }
        sink.writer.write(&batch)?;
        // One batch per row group: close it now rather than letting the
        // writer merge it with the next one.
        sink.writer.flush()?;
        sink.summary.row_groups += 1;
        sink.summary.rows += batch.num_rows();
        debug!(
            rows = batch.num_rows(),
            row_group = sink.summary.row_groups,
            "row group written"
        );
        Ok(())
    }
}

/// Layout of an existing Parquet file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub schema: Arc<Schema>,
    pub row_groups: Vec<usize>,
    pub rows: usize,
}

/// Read the schema and row-group sizes of a Parquet file.
pub fn inspect(path: &Path) -> Result<FileReport, SinkError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let row_groups: Vec<usize> = builder
        .metadata()
        .row_groups()
        .iter()
        .map(|rg| rg.num_rows() as usize)
        .collect();
    Ok(FileReport {
        schema: builder.schema().clone(),
        rows: row_groups.iter().sum(),
        row_groups,
    })
}

/// Read a whole Parquet file into a single batch.
pub fn read_all(path: &Path) -> Result<RecordBatch, SinkError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}
