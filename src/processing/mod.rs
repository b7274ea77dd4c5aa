//! Per-key records and the operators that merge them.
//!
//! - [`record`]: [`Record`], [`FieldValue`] and the [`Moments`] accumulator
//! - [`aggregate`]: [`Record::merge`] and render-time ratio lookups
//! - [`content`]: retention of original lines, optionally zlib-compressed
//!
//! ## Example: folding two lines
//!
//! ```rust
//! use std::sync::Arc;
//! use log_compactor::processing::{FieldValue, Record};
//! use log_compactor::types::{Aggregation, FieldDef, FieldType, Schema};
//!
//! let schema = Arc::new(Schema::new(vec![
//!     FieldDef::new("user", FieldType::String, 0).key(),
//!     FieldDef::new("bytes", FieldType::Int, 1).with_aggregation(Aggregation::Sum),
//! ]));
//! let line = |bytes| {
//!     Record::new(
//!         "alice",
//!         Arc::clone(&schema),
//!         vec![FieldValue::Strings(vec!["alice".into()]), FieldValue::Ints(vec![bytes])],
//!     )
//! };
//!
//! let mut rec = line(10);
//! rec.merge(line(6));
//! assert_eq!(rec.occurrences(), 2);
//! assert_eq!(rec.value("bytes"), Some(&FieldValue::Ints(vec![16])));
//! ```

pub mod aggregate;
pub mod content;
pub mod record;

pub use content::{CompressedLines, ContentRetention, RetainedContent};
pub use record::{ExtraField, FieldValue, Moments, Record};
