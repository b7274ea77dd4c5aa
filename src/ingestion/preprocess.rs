//! Sub-field expansion routines.
//!
//! Expansion never touches the shared [`crate::types::Schema`]: each routine returns the
//! extra field definitions for one line, and the parser attaches them to that line's record.

use crate::types::{Aggregation, FieldDef, FieldType, Preprocessing};

/// One expanded sub-field and its value.
#[derive(Debug, Clone, PartialEq)]
pub struct SubField {
    pub def: FieldDef,
    pub value: String,
}

/// Run `routine` on the token of field `parent`.
pub fn expand(parent: &str, routine: &Preprocessing, token: &str) -> Vec<SubField> {
    match routine {
        Preprocessing::KeyValue {
            pair_delimiters,
            kv_delimiter,
        } => key_value(parent, pair_delimiters, kv_delimiter, token),
    }
}

fn key_value(parent: &str, pair_delimiters: &str, kv_delimiter: &str, token: &str) -> Vec<SubField> {
    if kv_delimiter.is_empty() {
        return Vec::new();
    }
    let mut out: Vec<SubField> = Vec::new();
    for pair in token.split(|c: char| pair_delimiters.contains(c)) {
        let Some((k, v)) = pair.split_once(kv_delimiter) else {
            continue;
        };
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() {
            continue;
        }
        let name = format!("{parent}_{k}");
        // Repeated keys on one line keep the first value.
        if out.iter().any(|s| s.def.name == name) {
            continue;
        }
        out.push(SubField {
            def: FieldDef::new(name, FieldType::String, -1).with_aggregation(Aggregation::Union),
            value: v.to_owned(),
        });
    }
    out
}
