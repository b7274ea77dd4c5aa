//! Schema model for compaction.
//!
//! A [`Schema`] is an ordered list of [`FieldDef`]s describing how each token of a delimited
//! log line is typed, whether it participates in the grouping key, and which aggregation
//! operator combines it when two records with the same key are merged.
//!
//! Schemas are usually read from a JSON document with [`Schema::from_path`]:
//!
//! ```rust
//! use log_compactor::types::{Aggregation, Schema};
//!
//! let schema = Schema::from_json_str(r#"{
//!     "name": "proxy",
//!     "delimiters": " ",
//!     "fields": [
//!         {"name": "user", "type": "string", "position": 0, "key": true},
//!         {"name": "bytes", "type": "int", "aggregation": "sum"}
//!     ]
//! }"#).unwrap();
//!
//! assert_eq!(schema.fields.len(), 2);
//! assert_eq!(schema.field("bytes").unwrap().aggregation, Aggregation::Sum);
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CompactError, CompactResult};

/// Name of the pseudo-field that resolves to a record's occurrence total.
pub const LOGS_FIELD: &str = "logs";
/// Name under which a record's key is rendered.
pub const ID_FIELD: &str = "id";

/// Logical type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point number.
    Float,
    /// Boolean.
    Bool,
    /// Free text.
    String,
    /// Calendar date (optionally with a time component), see [`Processing`].
    Date,
    /// Time of day, see [`Processing`].
    Time,
    /// URL, optionally reformatted through [`Processing::url_format`].
    Url,
}

impl FieldType {
    /// Returns `true` for types stored as numbers.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }

    /// Returns `true` for types stored as strings.
    pub fn is_textual(self) -> bool {
        matches!(self, Self::String | Self::Date | Self::Time | Self::Url)
    }
}

/// Operator used to combine a field's values when two records share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Keep the receiver's value.
    #[default]
    None,
    /// Append values (strings are de-duplicated).
    Union,
    /// Like `Union`, with a per-value occurrence counter.
    UnionCount,
    /// Numeric sum.
    Sum,
    /// Numeric maximum.
    Max,
    /// Running mean, computed at render time.
    Mean,
    /// Running sample variance, computed at render time.
    Variance,
    /// Number of merged lines.
    Count,
    /// Quotient of two other fields, computed at render time.
    Ratio,
}

impl Aggregation {
    /// Whether the operator is meaningful for a field of type `ty`.
    pub fn accepts(self, ty: FieldType) -> bool {
        match self {
            Self::Sum | Self::Max | Self::Mean | Self::Variance => ty.is_numeric(),
            Self::UnionCount => ty.is_textual(),
            Self::None | Self::Union | Self::Count | Self::Ratio => true,
        }
    }
}

/// Granularity used to truncate dates and times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

/// Value processing applied to a token before it is stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Processing {
    /// Truncate dates/times to this granularity.
    pub truncate: Option<Granularity>,
    /// Bucket width (in units of `truncate`) for hour/minute/second truncation.
    pub bucket: Option<u32>,
    /// Signed shift in seconds applied before truncation.
    pub offset: Option<i64>,
    /// `chrono` format string used to parse and render dates/times.
    pub format: Option<String>,
    /// Template for URL fields, e.g. `"{host}{path}"`.
    pub url_format: Option<String>,
}

/// Sub-field expansion routine run on a token after the main pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "routine", rename_all = "snake_case")]
pub enum Preprocessing {
    /// Split `k1=v1; k2=v2` shaped content into `<field>_<k>` string sub-fields.
    KeyValue {
        #[serde(default = "default_pair_delimiters")]
        pair_delimiters: String,
        #[serde(default = "default_kv_delimiter")]
        kv_delimiter: String,
    },
}

fn default_pair_delimiters() -> String {
    ";".to_string()
}

fn default_kv_delimiter() -> String {
    "=".to_string()
}

/// Kind of derived filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// 1 if a same-position value contains [`Filter::value`], else 0.
    Contain,
}

/// Derived 0/1 indicator computed from other fields reading the same token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub value: String,
}

/// How match outcomes on several fields of one line combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLogic {
    /// The field must pass on its own.
    #[default]
    And,
    /// At least one `or` field of the line must pass.
    Or,
}

/// Literal set a match rule compares tokens against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    /// A single literal.
    Literal(String),
    /// A plain-text file, one literal per line.
    File(PathBuf),
}

/// Inclusion/exclusion predicate attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    #[serde(default)]
    pub logic: MatchLogic,
    /// A hit rejects the line instead of keeping it.
    #[serde(default)]
    pub negative: bool,
    /// Compare whole tokens instead of substrings.
    #[serde(default)]
    pub exact: bool,
    #[serde(flatten)]
    pub source: MatchSource,
}

/// Operands of a `ratio` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioOperands {
    pub numerator: String,
    pub denominator: String,
}

/// A single field of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Token index, or `-1` for "previous positioned field + 1".
    #[serde(default = "auto_position")]
    pub position: i64,
    #[serde(default)]
    pub key: bool,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub processing: Option<Processing>,
    #[serde(default)]
    pub preprocessing: Option<Preprocessing>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default, rename = "match")]
    pub match_rule: Option<MatchRule>,
    #[serde(default)]
    pub ratio: Option<RatioOperands>,
}

fn auto_position() -> i64 {
    -1
}

impl FieldDef {
    /// Create a plain field at `position`.
    pub fn new(name: impl Into<String>, field_type: FieldType, position: i64) -> Self {
        Self {
            name: name.into(),
            field_type,
            position,
            key: false,
            aggregation: Aggregation::None,
            processing: None,
            preprocessing: None,
            filter: None,
            match_rule: None,
            ratio: None,
        }
    }

    /// Mark the field as part of the grouping key.
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_processing(mut self, processing: Processing) -> Self {
        self.processing = Some(processing);
        self
    }

    pub fn with_preprocessing(mut self, preprocessing: Preprocessing) -> Self {
        self.preprocessing = Some(preprocessing);
        self
    }

    pub fn with_match(mut self, rule: MatchRule) -> Self {
        self.match_rule = Some(rule);
        self
    }

    pub fn with_contain_filter(mut self, value: impl Into<String>) -> Self {
        self.filter = Some(Filter {
            filter_type: FilterType::Contain,
            value: value.into(),
        });
        self
    }

    /// Turn the field into a `ratio` of two other fields (or [`LOGS_FIELD`]).
    pub fn with_ratio(mut self, numerator: impl Into<String>, denominator: impl Into<String>) -> Self {
        self.aggregation = Aggregation::Ratio;
        self.ratio = Some(RatioOperands {
            numerator: numerator.into(),
            denominator: denominator.into(),
        });
        self
    }

    /// Whether this field is a contain filter.
    pub fn is_filter(&self) -> bool {
        matches!(
            self.filter,
            Some(Filter {
                filter_type: FilterType::Contain,
                ..
            })
        )
    }

    /// Whether this field reads a token of its own.
    ///
    /// Ratio fields are computed at render time and never consume a position.
    pub fn reads_token(&self) -> bool {
        self.aggregation != Aggregation::Ratio
    }

    /// Aggregation actually applied on merge: filters without an operator are summed.
    pub fn effective_aggregation(&self) -> Aggregation {
        if self.aggregation == Aggregation::None && self.is_filter() {
            Aggregation::Sum
        } else {
            self.aggregation
        }
    }

    /// Whether the declared aggregation fits the declared type.
    ///
    /// Filters hold integer indicators regardless of the declared type.
    pub fn aggregation_type_matches(&self) -> bool {
        self.is_filter() || self.aggregation.accepts(self.field_type)
    }
}

/// Ordered field list plus global line syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: u32,
    /// Every character is a field delimiter.
    #[serde(default = "default_delimiters")]
    pub delimiters: String,
    #[serde(default)]
    pub quote: Option<char>,
    /// Lines starting with this marker are ignored.
    #[serde(default = "default_comment")]
    pub comment: String,
    /// Tag appended to every key.
    #[serde(default)]
    pub app_name: Option<String>,
    /// Lines whose token count differs are skipped.
    #[serde(default)]
    pub expected_tokens: Option<usize>,
    pub fields: Vec<FieldDef>,
}

fn default_delimiters() -> String {
    " ".to_string()
}

fn default_comment() -> String {
    "#".to_string()
}

impl Schema {
    /// Create a schema with default line syntax (space delimited, `#` comments).
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            name: String::new(),
            version: 0,
            delimiters: default_delimiters(),
            quote: None,
            comment: default_comment(),
            app_name: None,
            expected_tokens: None,
            fields,
        }
    }

    pub fn with_delimiters(mut self, delimiters: impl Into<String>) -> Self {
        self.delimiters = delimiters.into();
        self
    }

    pub fn with_quote(mut self, quote: char) -> Self {
        self.quote = Some(quote);
        self
    }

    /// Parse and validate a schema from a JSON document.
    pub fn from_json_str(input: &str) -> CompactResult<Self> {
        let schema: Schema = serde_json::from_str(input)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Read, parse and validate a schema file.
    ///
    /// Relative match-file paths are resolved against the schema file's directory.
    pub fn from_path(path: impl AsRef<Path>) -> CompactResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            CompactError::schema(format!("cannot read schema '{}': {e}", path.display()))
        })?;
        let mut schema = Self::from_json_str(&text)?;
        if let Some(base) = path.parent() {
            schema.resolve_match_files(base);
        }
        Ok(schema)
    }

    fn resolve_match_files(&mut self, base: &Path) {
        for field in &mut self.fields {
            if let Some(MatchRule {
                source: MatchSource::File(file),
                ..
            }) = &mut field.match_rule
            {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns a field by name, if present.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether any field is part of the key.
    pub fn has_key_fields(&self) -> bool {
        self.fields.iter().any(|f| f.key)
    }

    /// Resolved token position of every field (`None` for fields that read no token).
    pub fn resolved_positions(&self) -> Vec<Option<usize>> {
        let mut previous: Option<usize> = None;
        self.fields
            .iter()
            .map(|f| {
                if !f.reads_token() {
                    return None;
                }
                let pos = if f.position < 0 {
                    previous.map_or(0, |p| p + 1)
                } else {
                    f.position as usize
                };
                previous = Some(pos);
                Some(pos)
            })
            .collect()
    }

    /// Check structural invariants; type/aggregation mismatches are only warned about.
    pub fn validate(&self) -> CompactResult<()> {
        if self.fields.is_empty() {
            return Err(CompactError::schema("schema has no fields"));
        }
        if self.delimiters.is_empty() {
            return Err(CompactError::schema("schema has no delimiters"));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(CompactError::schema("field with empty name"));
            }
            if field.name == LOGS_FIELD || field.name == ID_FIELD {
                return Err(CompactError::schema(format!(
                    "field name '{}' is reserved",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(CompactError::schema(format!(
                    "duplicate field name '{}'",
                    field.name
                )));
            }
            if field.position < -1 {
                return Err(CompactError::schema(format!(
                    "field '{}' has invalid position {}",
                    field.name, field.position
                )));
            }
            if field.aggregation == Aggregation::Ratio && field.ratio.is_none() {
                return Err(CompactError::schema(format!(
                    "ratio field '{}' has no numerator/denominator",
                    field.name
                )));
            }
            if let Some(filter) = &field.filter {
                if filter.value.is_empty() {
                    return Err(CompactError::schema(format!(
                        "filter field '{}' has an empty value",
                        field.name
                    )));
                }
            }
            if !field.aggregation_type_matches() {
                warn!(
                    field = %field.name,
                    aggregation = ?field.aggregation,
                    field_type = ?field.field_type,
                    "aggregation does not apply to field type; field will be zeroed on merge"
                );
            }
        }

        for field in &self.fields {
            if let Some(ratio) = &field.ratio {
                for operand in [&ratio.numerator, &ratio.denominator] {
                    if operand != LOGS_FIELD && self.index_of(operand).is_none() {
                        return Err(CompactError::schema(format!(
                            "ratio field '{}' references unknown field '{operand}'",
                            field.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
