use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::processing::record::Record;

use super::stats::RunStats;

/// Final key -> record table of a run: exactly one record per key.
#[derive(Debug, Clone, Default)]
pub struct CompactedTable {
    records: HashMap<String, Record>,
    stats: RunStats,
}

impl CompactedTable {
    pub(crate) fn new(records: HashMap<String, Record>, mut stats: RunStats) -> Self {
        stats.keys = records.len() as u64;
        Self { records, stats }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Total number of lines folded into the table.
    pub fn total_occurrences(&self) -> u64 {
        self.records.values().map(Record::occurrences).sum()
    }

    /// Records in report order: occurrences descending, then key ascending ignoring case,
    /// then key bytes.
    pub fn ranked(&self) -> Vec<&Record> {
        let mut out: Vec<&Record> = self.records.values().collect();
        out.sort_by(|a, b| rank(a, b));
        out
    }

    /// Ownership of the records, in report order.
    pub fn into_ranked(self) -> Vec<Record> {
        let mut out: Vec<Record> = self.records.into_values().collect();
        out.sort_by(rank);
        out
    }

    pub fn into_records(self) -> HashMap<String, Record> {
        self.records
    }

    /// Fold another table into this one, merging records that share a key.
    pub fn merge(&mut self, other: CompactedTable) {
        self.stats += other.stats;
        merge_tables(&mut self.records, other.records);
        self.stats.keys = self.records.len() as u64;
    }
}

/// Merge `donor` into `receiver` record by record.
pub(crate) fn merge_tables(receiver: &mut HashMap<String, Record>, donor: HashMap<String, Record>) {
    for (key, record) in donor {
        match receiver.entry(key) {
            Entry::Occupied(mut e) => e.get_mut().merge(record),
            Entry::Vacant(e) => {
                e.insert(record);
            }
        }
    }
}

fn rank(a: &Record, b: &Record) -> Ordering {
    b.occurrences()
        .cmp(&a.occurrences())
        .then_with(|| cmp_ignore_case(a.key(), b.key()))
        .then_with(|| a.key().cmp(b.key()))
}

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::record::FieldValue;
    use crate::types::{FieldDef, FieldType, Schema};
    use std::sync::Arc;

    fn rec(key: &str, occurrences: u64) -> Record {
        let schema = Arc::new(Schema::new(vec![FieldDef::new("k", FieldType::String, 0).key()]));
        let mut r = Record::new(key, schema, vec![FieldValue::Strings(vec![key.into()])]);
        r.occurrences = occurrences;
        r
    }

    fn table(records: Vec<Record>) -> CompactedTable {
        CompactedTable::new(
            records.into_iter().map(|r| (r.key().to_owned(), r)).collect(),
            RunStats::default(),
        )
    }

    #[test]
    fn ranking_breaks_ties_by_key_ignoring_case() {
        let t = table(vec![rec("b", 2), rec("A", 2), rec("c", 5), rec("a", 2)]);
        let keys: Vec<_> = t.ranked().iter().map(|r| r.key().to_owned()).collect();
        assert_eq!(keys, vec!["c", "A", "a", "b"]);
        assert_eq!(t.total_occurrences(), 11);
    }

    #[test]
    fn merging_tables_keeps_one_record_per_key() {
        let mut left = table(vec![rec("x", 1), rec("y", 2)]);
        left.merge(table(vec![rec("y", 3), rec("z", 1)]));
        assert_eq!(left.len(), 3);
        assert_eq!(left.get("y").unwrap().occurrences(), 5);
        assert_eq!(left.stats().keys, 3);
    }
}
