//! Rendering of compacted tables.
//!
//! Every encoding walks the table in report order (see [`CompactedTable::ranked`]), so the
//! same table always renders to the same bytes.
//!
//! Field naming: a field renders under its own name; `<name>_count` carries union-count
//! counters, `count` aggregations and contain filters; `<name>_hold` carries the observation
//! count behind a mean or variance. Every record ends with `logs`, its occurrence count.

pub mod csv;
pub mod json;
pub mod plain;
pub mod top;

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::error::{CompactError, CompactResult};
use crate::execution::CompactedTable;

pub use top::{TopEntry, TopReport};

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// One CSV row per record.
    Csv,
    /// `key - count` lines.
    Plain,
    /// Nothing is written; the table is handed to the caller.
    Mem,
}

impl FromStr for OutputFormat {
    type Err = CompactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "plain" | "txt" => Ok(Self::Plain),
            "mem" | "memory" => Ok(Self::Mem),
            other => Err(CompactError::invalid_option(format!(
                "unknown output format '{other}'"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Plain => "plain",
            Self::Mem => "mem",
        })
    }
}

/// Write `table` to `writer` in `format`. `csv_header` only affects CSV.
pub fn render<W: Write>(
    table: &CompactedTable,
    format: OutputFormat,
    writer: W,
    csv_header: bool,
) -> CompactResult<()> {
    let records = table.ranked();
    match format {
        OutputFormat::Json => json::write_records(records, writer),
        OutputFormat::Csv => csv::write_records(records, writer, csv_header),
        OutputFormat::Plain => plain::write_records(records, writer),
        OutputFormat::Mem => Ok(()),
    }
}

/// Render `table` into a string.
pub fn render_to_string(
    table: &CompactedTable,
    format: OutputFormat,
    csv_header: bool,
) -> CompactResult<String> {
    let mut buf = Vec::new();
    render(table, format, &mut buf, csv_header)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
