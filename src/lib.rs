//! `log-compactor` turns voluminous delimited log files into compact per-key summaries.
//!
//! A JSON [`types::Schema`] declares each field's position, type, key membership and
//! aggregation operator, plus optional match rules, contain filters, date/URL processing and
//! sub-field expansion. Every input line becomes a single-line [`processing::Record`]; records
//! sharing a key are merged in parallel into one record per key, which is then rendered as
//! JSON, CSV, plain `key - count` text, or handed back in memory.
//!
//! ## Aggregations
//!
//! | operator | merge | rendered as |
//! | --- | --- | --- |
//! | `none` | receiver kept | `name` |
//! | `union` | distinct strings / all numbers | `name` (sorted list) |
//! | `union_count` | distinct strings with counters | `name`, `name_count` |
//! | `sum`, `max` | first value folded | `name` |
//! | `mean`, `variance` | running sum, sum of squares, count | `name`, `name_hold` |
//! | `count` | counters added | `name_count` |
//! | `ratio` | nothing stored | `name` = numerator / denominator |
//!
//! Contain filters render as `<name>_count`, and every record carries `logs`, the number of
//! lines folded into it.
//!
//! ## Quick example
//!
//! ```rust
//! use std::sync::Arc;
//! use log_compactor::execution::{CompactionEngine, ExecutionOptions};
//! use log_compactor::ingestion::{LineParser, MatchSets, ParseOptions};
//! use log_compactor::output::{render_to_string, OutputFormat};
//! use log_compactor::types::Schema;
//!
//! # fn main() -> Result<(), log_compactor::CompactError> {
//! let schema = Schema::from_json_str(r#"{
//!     "name": "proxy",
//!     "fields": [
//!         {"name": "user", "type": "string", "position": 0, "key": true},
//!         {"name": "bytes", "type": "int", "aggregation": "sum"}
//!     ]
//! }"#)?;
//! let parser = LineParser::new(Arc::new(schema), Arc::new(MatchSets::default()), ParseOptions::default());
//! let engine = CompactionEngine::new(ExecutionOptions::default())?;
//!
//! let table = engine.compact_bytes(&parser, b"alice 10\nbob 1\nalice 6\n")?;
//! let out = render_to_string(&table, OutputFormat::Plain, false)?;
//! assert_eq!(out, "alice - 2\nbob - 1\n");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: schema and field descriptors
//! - [`ingestion`]: tokenizer, match engine, value processing and the line parser
//! - [`processing`]: records and merge operators
//! - [`execution`]: the parallel map–combine–reduce engine, metrics and observers
//! - [`output`]: renderers and the top-N report
//! - [`job`]: multi-input runs, result merging, snapshots
//! - [`error`]: error types

pub mod error;
pub mod execution;
pub mod ingestion;
pub mod job;
pub mod output;
pub mod processing;
pub mod types;

pub use error::{CompactError, CompactResult};
