//! One JSON object per record, newline separated.

use std::io::Write;

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::CompactResult;
use crate::processing::record::{FieldValue, Record};
use crate::types::{Aggregation, FieldDef, ID_FIELD, LOGS_FIELD};

/// Suffix of the companion record carrying the retained lines.
pub const CONTENT_SUFFIX: &str = "_content";

/// Render `record` as a flat JSON object: `id`, schema fields in order, expanded sub-fields,
/// then `logs`.
pub fn render_record(record: &Record) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert(ID_FIELD.to_owned(), Value::String(record.key().to_owned()));

    for (def, value) in record.schema().fields.iter().zip(record.values()) {
        if def.aggregation == Aggregation::Ratio {
            if let Some(ratio) = &def.ratio {
                let q = record.ratio(&ratio.numerator, &ratio.denominator);
                out.insert(def.name.clone(), json!(f64::from(q)));
            }
            continue;
        }
        render_field(&mut out, def, value);
    }
    for extra in record.extra_fields() {
        render_field(&mut out, &extra.def, &extra.value);
    }

    out.insert(LOGS_FIELD.to_owned(), json!(record.occurrences()));
    out
}

/// The companion record of retained lines, if any.
pub fn render_content(record: &Record) -> Option<Map<String, Value>> {
    let content = record.content()?;
    let text = match content.text() {
        Ok(t) => t,
        Err(e) => {
            warn!(key = record.key(), error = %e, "retained content could not be decompressed");
            return None;
        }
    };
    let mut out = Map::new();
    out.insert(
        ID_FIELD.to_owned(),
        Value::String(format!("{}{CONTENT_SUFFIX}", record.key())),
    );
    out.insert("original_size".to_owned(), json!(text.len()));
    out.insert("content".to_owned(), Value::String(text));
    Some(out)
}

fn render_field(out: &mut Map<String, Value>, def: &FieldDef, value: &FieldValue) {
    let name = def.name.as_str();
    if def.is_filter() {
        out.insert(format!("{name}_count"), list(value));
        return;
    }
    match value {
        FieldValue::Empty => {}
        FieldValue::Moments(m) => {
            let v = if def.aggregation == Aggregation::Variance {
                m.variance()
            } else {
                m.mean()
            };
            out.insert(name.to_owned(), json!(v));
            out.insert(format!("{name}_hold"), json!(m.count));
        }
        FieldValue::Count(c) => {
            out.insert(format!("{name}_count"), json!(c));
        }
        FieldValue::CountedStrings { values, counts } => {
            let mut pairs: Vec<(&String, u64)> = values.iter().zip(counts.iter().copied()).collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            let (vs, cs): (Vec<Value>, Vec<Value>) = pairs
                .into_iter()
                .map(|(v, c)| (json!(v), json!(c)))
                .unzip();
            out.insert(name.to_owned(), scalar_or_array(vs));
            out.insert(format!("{name}_count"), scalar_or_array(cs));
        }
        other => {
            out.insert(name.to_owned(), list(other));
        }
    }
}

/// Plain value lists, sorted so rendering does not depend on merge order.
fn list(value: &FieldValue) -> Value {
    let items: Vec<Value> = match value {
        FieldValue::Ints(v) => {
            let mut v = v.clone();
            v.sort_unstable();
            v.into_iter().map(Value::from).collect()
        }
        FieldValue::Floats(v) => {
            let mut v = v.clone();
            v.sort_by(f64::total_cmp);
            v.into_iter().map(Value::from).collect()
        }
        FieldValue::Bools(v) => {
            let mut v = v.clone();
            v.sort_unstable();
            v.into_iter().map(Value::from).collect()
        }
        FieldValue::Strings(v) => {
            let mut v: Vec<&String> = v.iter().collect();
            v.sort_unstable();
            v.into_iter().map(|s| Value::String(s.clone())).collect()
        }
        FieldValue::CountedStrings { values, .. } => {
            values.iter().map(|s| Value::String(s.clone())).collect()
        }
        FieldValue::Moments(m) => vec![json!(m.sum)],
        FieldValue::Count(c) => vec![json!(c)],
        FieldValue::Empty => Vec::new(),
    };
    scalar_or_array(items)
}

fn scalar_or_array(mut items: Vec<Value>) -> Value {
    match items.len() {
        0 => Value::Null,
        1 => items.remove(0),
        _ => Value::Array(items),
    }
}

/// Write `records` as NDJSON, each followed by its content companion when lines are retained.
pub fn write_records<'a, W: Write>(
    records: impl IntoIterator<Item = &'a Record>,
    mut writer: W,
) -> CompactResult<()> {
    for record in records {
        serde_json::to_writer(&mut writer, &render_record(record))?;
        writer.write_all(b"\n")?;
        if let Some(content) = render_content(record) {
            serde_json::to_writer(&mut writer, &content)?;
            writer.write_all(b"\n")?;
        }
    }
    writer.flush()?;
    Ok(())
}
