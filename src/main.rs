use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use rowquet::demo::write_demo_rows;
use rowquet::sink::parquet::inspect;
use rowquet::{Compression, RowWriter, WriteMode, WriterOptions};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliCompression {
    /// Fast compression
    Snappy,
    /// Better ratio
    Zstd,
}

impl From<CliCompression> for Compression {
    fn from(value: CliCompression) -> Self {
        match value {
            CliCompression::Snappy => Compression::Snappy,
            CliCompression::Zstd => Compression::Zstd,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliWriteMode {
    /// Error if the file already exists
    Error,
    /// Overwrite an existing file
    Overwrite,
    /// Append row groups to an existing file
    Append,
}

impl From<CliWriteMode> for WriteMode {
    fn from(mode: CliWriteMode) -> Self {
        match mode {
            CliWriteMode::Error => WriteMode::ErrorIfExists,
            CliWriteMode::Overwrite => WriteMode::Overwrite,
            CliWriteMode::Append => WriteMode::Append,
        }
    }
}

/// Row-at-a-time Parquet writer
#[derive(Parser, Debug)]
#[command(name = "rowquet", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a table of synthetic mixed-type rows
    Generate(GenerateArgs),

    /// Print the schema and row groups of a Parquet file
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    /// Output Parquet file
    output: PathBuf,

    /// Number of rows to write
    #[arg(short, long, default_value_t = 1_000_000)]
    rows: usize,

    /// Rows per row group
    #[arg(long, default_value_t = 65_536)]
    row_group_size: usize,

    /// Column compression
    #[arg(short, long, value_enum, default_value = "zstd")]
    compression: CliCompression,

    /// What to do if the output exists
    #[arg(short, long, value_enum, default_value = "overwrite")]
    mode: CliWriteMode,

    /// Skip per-row column order checks
    #[arg(long)]
    no_verify: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Parquet file to inspect
    file: PathBuf,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Generate(args) => run_generate(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}

fn run_generate(args: GenerateArgs) -> ExitCode {
    let options = WriterOptions {
        records_per_row_group: args.row_group_size,
        compression: args.compression.into(),
        write_mode: args.mode.into(),
        verify_column_order: !args.no_verify,
    };

    let mut writer = match RowWriter::create(&args.output, options) {
        Ok(writer) => writer,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = write_demo_rows(&mut writer, args.rows, 0) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    match writer.close() {
        Ok(stats) => {
            println!(
                "Wrote {} rows in {} row groups to {} ({} dictionary strings)",
                stats.rows,
                stats.row_groups,
                args.output.display(),
                stats.dictionary_entries
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_inspect(args: InspectArgs) -> ExitCode {
    let report = match inspect(&args.file) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("{}", args.file.display());
    println!("Columns:");
    for field in report.schema.fields() {
        println!("  {}: {}", field.name(), field.data_type());
    }
    println!("Row groups:");
    for (i, rows) in report.row_groups.iter().enumerate() {
        println!("  {i}: {rows} rows");
    }
    println!("Total rows: {}", report.rows);
    ExitCode::SUCCESS
}
