//! The per-key aggregate built from one or more log lines.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{FieldDef, Schema};

use super::content::RetainedContent;

/// Running accumulator for `mean` and `variance` fields.
///
/// Only the three sums are merged; the statistics are derived at render time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub sum: f64,
    pub sum_sq: f64,
    pub count: u64,
}

impl Moments {
    /// Accumulator holding a single observation.
    pub fn of(value: f64) -> Self {
        Self {
            sum: value,
            sum_sq: value * value,
            count: 1,
        }
    }

    pub fn absorb(&mut self, other: &Moments) {
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.count += other.count;
    }

    /// `sum / count`, or `0.0` when empty.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Sample variance `(sumSq - sum²/n) / max(1, n - 1)`.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let denom = (self.count.saturating_sub(1)).max(1) as f64;
        (self.sum_sq - (self.sum * self.sum) / n) / denom
    }
}

/// Stored values of one field. Scalars are lists of length one.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Bools(Vec<bool>),
    Strings(Vec<String>),
    /// Distinct strings with a parallel occurrence counter (`union_count`).
    CountedStrings { values: Vec<String>, counts: Vec<u64> },
    Moments(Moments),
    Count(u64),
    /// Nothing stored: ratio fields, zeroed fields.
    Empty,
}

impl FieldValue {
    /// Number of stored list entries.
    pub fn len(&self) -> usize {
        match self {
            Self::Ints(v) => v.len(),
            Self::Floats(v) => v.len(),
            Self::Bools(v) => v.len(),
            Self::Strings(v) => v.len(),
            Self::CountedStrings { values, .. } => values.len(),
            Self::Moments(_) | Self::Count(_) => 1,
            Self::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First value as a float, for numeric lookups (ratio operands, top reports).
    pub fn first_number(&self) -> Option<f64> {
        match self {
            Self::Ints(v) => v.first().map(|&x| x as f64),
            Self::Floats(v) => v.first().copied(),
            Self::Bools(v) => v.first().map(|&b| if b { 1.0 } else { 0.0 }),
            Self::Strings(v) => v.first().and_then(|s| s.trim().parse().ok()),
            Self::CountedStrings { values, .. } => {
                values.first().and_then(|s| s.trim().parse().ok())
            }
            Self::Moments(m) => Some(m.sum),
            Self::Count(c) => Some(*c as f64),
            Self::Empty => None,
        }
    }
}

/// A field that exists only on some lines, produced by sub-field expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtraField {
    pub def: FieldDef,
    pub value: FieldValue,
}

/// Per-key aggregate.
///
/// `values` is aligned with `schema.fields` by position and never reordered. Lines that
/// carried expanded sub-fields add [`ExtraField`]s, matched by name on merge.
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) key: String,
    pub(crate) occurrences: u64,
    pub(crate) schema: Arc<Schema>,
    pub(crate) values: Vec<FieldValue>,
    pub(crate) extra: Vec<ExtraField>,
    pub(crate) content: Option<RetainedContent>,
    /// Value -> position per string slot, so repeated unions stay linear.
    pub(crate) string_index: HashMap<usize, HashMap<String, usize>>,
}

impl Record {
    /// Create a single-line record (`occurrences = 1`).
    ///
    /// # Panics
    ///
    /// Panics if `values` is not aligned with `schema.fields`.
    pub fn new(key: impl Into<String>, schema: Arc<Schema>, values: Vec<FieldValue>) -> Self {
        assert!(
            values.len() == schema.fields.len(),
            "record value count {} does not match schema length {}",
            values.len(),
            schema.fields.len()
        );
        Self {
            key: key.into(),
            occurrences: 1,
            schema,
            values,
            extra: Vec::new(),
            content: None,
            string_index: HashMap::new(),
        }
    }

    pub fn with_extra_fields(mut self, extra: Vec<ExtraField>) -> Self {
        self.extra = extra;
        self
    }

    pub fn with_content(mut self, content: Option<RetainedContent>) -> Self {
        self.content = content;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of lines folded into this record.
    pub fn occurrences(&self) -> u64 {
        self.occurrences
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Values aligned with the schema fields.
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn extra_fields(&self) -> &[ExtraField] {
        &self.extra
    }

    pub fn content(&self) -> Option<&RetainedContent> {
        self.content.as_ref()
    }

    /// Value of a schema field or expanded sub-field, by name.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        match self.schema.index_of(name) {
            Some(idx) => self.values.get(idx),
            None => self
                .extra
                .iter()
                .find(|e| e.def.name == name)
                .map(|e| &e.value),
        }
    }

    /// Take the retained content out of the record (used when rendering compressed content).
    pub fn take_content(&mut self) -> Option<RetainedContent> {
        self.content.take()
    }

    /// Drop the transient string index.
    pub fn shrink(&mut self) {
        self.string_index.clear();
        self.string_index.shrink_to_fit();
    }
}
