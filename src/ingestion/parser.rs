//! Line parser: one raw line plus a [`Schema`] in, one single-line [`Record`] out.
//!
//! The parser never mutates the shared schema. Sub-fields produced by preprocessing routines
//! travel with the record that carried them (see [`ParsedLine::appended_fields`]).

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CompactResult;
use crate::processing::content::{ContentRetention, RetainedContent};
use crate::processing::record::{ExtraField, FieldValue, Moments, Record};
use crate::types::{Aggregation, FieldDef, FieldType, MatchLogic, Schema};

use super::matcher::{self, MatchSets, MatchVerdict, OrState};
use super::{preprocess, processing, tokenizer};

/// Per-run parsing options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOptions {
    /// Tag appended to every key; overrides the schema's `app_name`.
    pub app_name: Option<String>,
    /// Whether original lines are kept on records.
    pub content: ContentRetention,
}

/// Why a line was skipped as malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The schema declares an exact token count and the line has another.
    TokenCount { expected: usize, found: usize },
    /// A field reads a position the line does not have.
    FieldPosition {
        field: String,
        position: usize,
        tokens: usize,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenCount { expected, found } => {
                write!(f, "expected {expected} tokens, found {found}")
            }
            Self::FieldPosition {
                field,
                position,
                tokens,
            } => write!(
                f,
                "field '{field}' reads position {position} but the line has {tokens} tokens"
            ),
        }
    }
}

/// A successfully parsed line.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub record: Record,
    /// Fields emptied because their aggregation does not fit their type.
    pub zeroed: usize,
    /// Date/time tokens kept unchanged because they did not parse.
    pub warnings: usize,
}

impl ParsedLine {
    /// Field definitions this line added beyond the schema.
    pub fn appended_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.record.extra_fields().iter().map(|e| &e.def)
    }
}

/// Result of parsing one line.
#[derive(Debug, Clone)]
pub enum LineOutcome {
    Parsed(ParsedLine),
    /// Blank or comment line.
    Ignored,
    /// Malformed line.
    Skipped(SkipReason),
    /// A match rule dropped the line.
    Rejected { field: String },
}

/// Turns raw lines into single-line records according to a schema.
///
/// Cheap to clone; all workers of a run share the schema and the match-set cache.
#[derive(Debug, Clone)]
pub struct LineParser {
    schema: Arc<Schema>,
    positions: Arc<[Option<usize>]>,
    matchers: Arc<MatchSets>,
    app_name: Option<String>,
    content: ContentRetention,
}

impl LineParser {
    pub fn new(schema: Arc<Schema>, matchers: Arc<MatchSets>, options: ParseOptions) -> Self {
        let positions = schema.resolved_positions().into();
        let app_name = options
            .app_name
            .or_else(|| schema.app_name.clone())
            .filter(|a| !a.is_empty());
        Self {
            schema,
            positions,
            matchers,
            app_name,
            content: options.content,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Parse one line.
    ///
    /// Only a match file that cannot be loaded is an error; every per-line anomaly is
    /// reported through [`LineOutcome`].
    pub fn parse_line(&self, line: &str) -> CompactResult<LineOutcome> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty()
            || (!self.schema.comment.is_empty() && line.starts_with(&self.schema.comment))
        {
            return Ok(LineOutcome::Ignored);
        }

        let tokens = tokenizer::tokenize(line, &self.schema.delimiters, self.schema.quote);
        if let Some(expected) = self.schema.expected_tokens {
            if tokens.len() != expected {
                return Ok(LineOutcome::Skipped(SkipReason::TokenCount {
                    expected,
                    found: tokens.len(),
                }));
            }
        }
        for (def, pos) in self.schema.fields.iter().zip(self.positions.iter()) {
            if let Some(pos) = *pos {
                if pos >= tokens.len() {
                    return Ok(LineOutcome::Skipped(SkipReason::FieldPosition {
                        field: def.name.clone(),
                        position: pos,
                        tokens: tokens.len(),
                    }));
                }
            }
        }

        let fields = &self.schema.fields;
        let mut values = Vec::with_capacity(fields.len());
        let mut processed: Vec<Option<String>> = vec![None; fields.len()];
        let mut extra: Vec<ExtraField> = Vec::new();
        let mut or_state = OrState::default();
        let mut last_or_field: Option<&str> = None;
        let mut zeroed = 0;
        let mut warnings = 0;

        for (idx, def) in fields.iter().enumerate() {
            let Some(pos) = self.positions[idx] else {
                values.push(FieldValue::Empty);
                continue;
            };
            if def.is_filter() {
                // Derived once every other field is processed.
                values.push(FieldValue::Ints(vec![0]));
                continue;
            }

            let token = self.strip_quotes(tokens[pos]);
            let token = match &def.processing {
                Some(p) => match processing::apply(def.field_type, p, &token) {
                    Ok(v) => v,
                    Err(w) => {
                        warn!(
                            field = %def.name,
                            token = %token,
                            format = %w.format,
                            "could not parse {:?} token; keeping it unchanged",
                            w.field_type
                        );
                        warnings += 1;
                        token
                    }
                },
                None => token,
            };

            let verdict = matcher::evaluate(&self.matchers, def, &token, &mut or_state)?;
            if verdict == MatchVerdict::RejectLine {
                return Ok(LineOutcome::Rejected {
                    field: def.name.clone(),
                });
            }
            if def.match_rule.as_ref().is_some_and(|r| r.logic == MatchLogic::Or) && !def.key {
                last_or_field = Some(&def.name);
            }

            if let Some(routine) = &def.preprocessing {
                extra.extend(
                    preprocess::expand(&def.name, routine, &token)
                        .into_iter()
                        .map(|sub| ExtraField {
                            def: sub.def,
                            value: FieldValue::Strings(vec![sub.value]),
                        }),
                );
            }

            if def.aggregation_type_matches() {
                values.push(coerce(def, &token));
            } else {
                zeroed += 1;
                values.push(FieldValue::Empty);
            }
            processed[idx] = Some(token);
        }

        if !or_state.keeps_line() {
            return Ok(LineOutcome::Rejected {
                field: last_or_field.unwrap_or_default().to_owned(),
            });
        }

        for (idx, def) in fields.iter().enumerate() {
            let (Some(filter), Some(pos)) = (&def.filter, self.positions[idx]) else {
                continue;
            };
            let mut same_position = fields
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != idx && self.positions[j] == Some(pos))
                .filter_map(|(j, _)| processed[j].as_deref())
                .peekable();
            let hit = if same_position.peek().is_some() {
                same_position.any(|v| v.contains(filter.value.as_str()))
            } else {
                self.strip_quotes(tokens[pos]).contains(filter.value.as_str())
            };
            values[idx] = FieldValue::Ints(vec![i64::from(hit)]);
        }

        let key = self.build_key(&processed);
        let record = Record::new(key, Arc::clone(&self.schema), values)
            .with_extra_fields(extra)
            .with_content(RetainedContent::from_line(line, self.content));
        Ok(LineOutcome::Parsed(ParsedLine {
            record,
            zeroed,
            warnings,
        }))
    }

    fn strip_quotes(&self, token: &str) -> String {
        match self.schema.quote {
            Some(q) => token.replace(q, ""),
            None => token.to_owned(),
        }
    }

    /// Key fields contribute their processed token, in schema order.
    fn build_key(&self, processed: &[Option<String>]) -> String {
        let mut key = self
            .schema
            .fields
            .iter()
            .zip(processed)
            .filter(|(def, _)| def.key)
            .filter_map(|(_, v)| v.as_deref())
            .collect::<Vec<_>>()
            .join("_");
        if let Some(app) = &self.app_name {
            if !key.is_empty() {
                key.push('_');
            }
            key.push_str(app);
        }
        key
    }
}

/// Build the single-line value of `def` from its processed token.
fn coerce(def: &FieldDef, token: &str) -> FieldValue {
    match def.aggregation {
        Aggregation::Mean | Aggregation::Variance => {
            return FieldValue::Moments(Moments::of(parse_float(&def.name, token)));
        }
        Aggregation::Count => return FieldValue::Count(1),
        Aggregation::UnionCount => {
            return FieldValue::CountedStrings {
                values: vec![token.to_owned()],
                counts: vec![1],
            };
        }
        _ => {}
    }
    match def.field_type {
        FieldType::Int => FieldValue::Ints(vec![parse_int(&def.name, token)]),
        FieldType::Float => FieldValue::Floats(vec![parse_float(&def.name, token)]),
        FieldType::Bool => FieldValue::Bools(vec![parse_bool(token)]),
        FieldType::String | FieldType::Date | FieldType::Time | FieldType::Url => {
            FieldValue::Strings(vec![token.to_owned()])
        }
    }
}

fn parse_int(field: &str, token: &str) -> i64 {
    let t = token.trim();
    t.parse::<i64>()
        .ok()
        .or_else(|| t.parse::<f64>().ok().map(|f| f as i64))
        .unwrap_or_else(|| {
            debug!(field, token, "not an integer; using 0");
            0
        })
}

fn parse_float(field: &str, token: &str) -> f64 {
    token.trim().parse::<f64>().unwrap_or_else(|_| {
        debug!(field, token, "not a number; using 0");
        0.0
    })
}

fn parse_bool(token: &str) -> bool {
    matches!(
        token.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "t" | "y"
    )
}
