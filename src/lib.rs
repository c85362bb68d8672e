//! rowquet - write Parquet files one row at a time.
//!
//! Rows are packed into fixed-width staging buffers on the calling thread
//! and a background worker transposes each full buffer into one Parquet row
//! group.
//!
//! ```no_run
//! use rowquet::{RowWriter, WriterOptions};
//!
//! let mut writer = RowWriter::create("out.parquet", WriterOptions::default())?;
//! for i in 0..10i64 {
//!     writer.write_field("id", i)?;
//!     writer.write_field("name", format!("row {i}"))?;
//!     writer.next_record()?;
//! }
//! let stats = writer.close()?;
//! println!("wrote {} rows in {} row groups", stats.rows, stats.row_groups);
//! # Ok::<(), rowquet::WriterError>(())
//! ```

pub mod demo;
pub mod flush;
pub mod schema;
pub mod sink;
pub mod staging;
pub mod transpose;
pub mod value;
pub mod writer;

pub use flush::{FlushError, FlushState};
pub use schema::{SchemaError, TableSchema};
pub use sink::{Compression, SinkError, WriteMode};
pub use value::{FieldValue, LogicalType, Timestamp, TimestampKind};
pub use writer::{RowWriter, WriteStats, WriterError, WriterOptions};
