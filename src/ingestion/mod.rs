//! Turning raw log lines into single-line records.
//!
//! [`LineParser::parse_line`] drives the per-line pipeline:
//!
//! - [`tokenizer`]: quote- and delimiter-aware splitting
//! - [`processing`]: date/time bucketing and URL reformatting
//! - [`matcher`]: per-field inclusion/exclusion rules with a shared, lazily loaded cache
//! - [`preprocess`]: sub-field expansion

pub mod matcher;
pub mod parser;
pub mod preprocess;
pub mod processing;
pub mod tokenizer;

pub use matcher::{FileMatchSetLoader, MatchSetLoader, MatchSets};
pub use parser::{LineOutcome, LineParser, ParseOptions, ParsedLine, SkipReason};
