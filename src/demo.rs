//! Synthetic mixed-type rows for the CLI and for smoke tests.

use crate::value::Timestamp;
use crate::writer::{RowWriter, WriterError};

/// 2024-01-01T00:00:00Z in nanoseconds.
const EPOCH_2024_NANOS: i64 = 1_704_067_200_000_000_000;

const WORDS: [&str; 6] = [
    "alpha",
    "bravo",
    "charlie",
    "delta-echo-foxtrot",
    "golf hotel india juliet",
    "kilo",
];

/// Number of columns each demo row has.
pub const DEMO_COLUMNS: usize = 13;

/// Write `rows` demo rows, numbering them from `start`.
///
/// Columns: float, double, int, long, string, long_string, bool, datetime
/// and multiple_0 through multiple_4.
pub fn write_demo_rows(
    writer: &mut RowWriter,
    rows: usize,
    start: usize,
) -> Result<(), WriterError> {
    for n in start..start + rows {
        let i = n as i64;
        writer.write_field("float", n as f32 * 1.5)?;
        writer.write_field("double", n as f64 / 3.0)?;
        writer.write_field("int", (i % 1_000_000) as i32)?;
        writer.write_field("long", i * 1_000_003)?;
        writer.write_field("string", WORDS[n % WORDS.len()])?;
        writer.write_field("long_string", format!("row {n} of the demo table"))?;
        writer.write_field("bool", n % 2 == 0)?;
        writer.write_field(
            "datetime",
            Timestamp::from_utc_nanos(EPOCH_2024_NANOS + i * 1_000_000_000),
        )?;
        for k in 0..5 {
            writer.write_indexed_field("multiple_{0}", k, (n * k) as i32)?;
        }
        writer.next_record()?;
    }
    Ok(())
}
