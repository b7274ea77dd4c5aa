use std::fmt;

use crate::execution::CompactedTable;

/// One line of a [`TopReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopEntry {
    pub key: String,
    pub occurrences: u64,
}

/// The most frequent keys of a table plus its totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopReport {
    pub entries: Vec<TopEntry>,
    pub total_keys: usize,
    pub total_logs: u64,
}

impl TopReport {
    /// Up to `n` keys in report order (occurrences descending, key ascending ignoring case).
    pub fn from_table(table: &CompactedTable, n: usize) -> Self {
        let entries = table
            .ranked()
            .into_iter()
            .take(n)
            .map(|r| TopEntry {
                key: r.key().to_owned(),
                occurrences: r.occurrences(),
            })
            .collect();
        Self {
            entries,
            total_keys: table.len(),
            total_logs: table.total_occurrences(),
        }
    }
}

impl fmt::Display for TopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.entries.iter().enumerate() {
            writeln!(f, "{:>3}. {} - {}", i + 1, e.key, e.occurrences)?;
        }
        write!(f, "keys={} logs={}", self.total_keys, self.total_logs)
    }
}
