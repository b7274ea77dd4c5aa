//! One CSV row per record.
//!
//! Columns are the rendered JSON field names in first-seen order across all records, so
//! records carrying extra sub-fields widen the header instead of shifting columns. Lists are
//! joined with `;`.

use std::io::Write;

use serde_json::{Map, Value};

use crate::error::CompactResult;
use crate::processing::record::Record;

use super::json::render_record;

/// Separator for list values inside one cell.
pub const LIST_SEPARATOR: &str = ";";

/// Rendered rows sharing one column set, possibly gathered from several tables.
///
/// A multi-input run feeds every table in before writing so that rows from later inputs
/// line up with a header that also covers their sub-fields.
#[derive(Debug, Default)]
pub struct CsvRows {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl CsvRows {
    /// Render `records` and widen the column set with any name not seen yet.
    pub fn extend<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
        for record in records {
            let row = render_record(record);
            for name in row.keys() {
                if !self.columns.iter().any(|c| c == name) {
                    self.columns.push(name.clone());
                }
            }
            self.rows.push(row);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Write every row, with a header row when `header` is set.
    pub fn write<W: Write>(&self, writer: W, header: bool) -> CompactResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        if header && !self.columns.is_empty() {
            wtr.write_record(&self.columns)?;
        }
        for row in &self.rows {
            wtr.write_record(
                self.columns
                    .iter()
                    .map(|c| row.get(c).map(cell).unwrap_or_default()),
            )?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Write `records` as CSV, with a header row when `header` is set.
pub fn write_records<'a, W: Write>(
    records: impl IntoIterator<Item = &'a Record>,
    writer: W,
    header: bool,
) -> CompactResult<()> {
    let mut rows = CsvRows::default();
    rows.extend(records);
    rows.write(writer, header)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(cell)
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::processing::record::{ExtraField, FieldValue};
    use crate::types::{Aggregation, FieldDef, FieldType, Schema};

    fn rec(key: &str, hosts: Vec<&str>, bytes: i64) -> Record {
        let schema = Arc::new(Schema::new(vec![
            FieldDef::new("user", FieldType::String, 0).key(),
            FieldDef::new("host", FieldType::String, 1).with_aggregation(Aggregation::Union),
            FieldDef::new("bytes", FieldType::Int, 2).with_aggregation(Aggregation::Sum),
        ]));
        Record::new(
            key,
            schema,
            vec![
                FieldValue::Strings(vec![key.into()]),
                FieldValue::Strings(hosts.into_iter().map(String::from).collect()),
                FieldValue::Ints(vec![bytes]),
            ],
        )
    }

    #[test]
    fn header_and_joined_lists() {
        let a = rec("alice", vec!["b.com", "a.com"], 10);
        let b = rec("bob", vec!["c.com"], 3);
        let mut out = Vec::new();
        write_records([&a, &b], &mut out, true).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "id,user,host,bytes,logs\nalice,alice,a.com;b.com,10,1\nbob,bob,c.com,3,1\n"
        );
    }

    #[test]
    fn extra_sub_fields_widen_the_header() {
        let a = rec("alice", vec!["a"], 1);
        let b = rec("bob", vec!["b"], 2).with_extra_fields(vec![ExtraField {
            def: FieldDef::new("ext_k", FieldType::String, -1),
            value: FieldValue::Strings(vec!["v".into()]),
        }]);
        let mut out = Vec::new();
        write_records([&a, &b], &mut out, false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "alice,alice,a,1,1,\nbob,bob,b,2,1,v\n"
        );
    }

    #[test]
    fn rows_from_several_tables_share_one_header() {
        let kv = |key: &str, sub: &str| {
            rec(key, vec!["h"], 1).with_extra_fields(vec![ExtraField {
                def: FieldDef::new(sub, FieldType::String, -1),
                value: FieldValue::Strings(vec![format!("{key}-{sub}")]),
            }])
        };
        let first = kv("alice", "ext_k1");
        let second = kv("bob", "ext_k2");

        let mut rows = CsvRows::default();
        rows.extend([&first]);
        rows.extend([&second]);
        assert_eq!(
            rows.columns(),
            ["id", "user", "host", "bytes", "ext_k1", "logs", "ext_k2"]
        );

        let mut out = Vec::new();
        rows.write(&mut out, true).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "id,user,host,bytes,ext_k1,logs,ext_k2\n\
             alice,alice,h,1,alice-ext_k1,1,\n\
             bob,bob,h,1,,1,bob-ext_k2\n"
        );
    }
}
