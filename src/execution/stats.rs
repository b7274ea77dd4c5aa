use std::fmt;
use std::ops::AddAssign;

/// Line and key counters of one run, or of several runs added together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub lines_read: u64,
    pub lines_parsed: u64,
    /// Blank and comment lines, plus a skipped header.
    pub lines_ignored: u64,
    /// Malformed lines (token count, field position).
    pub lines_skipped: u64,
    /// Lines dropped by match rules.
    pub lines_rejected: u64,
    /// Fields emptied because their aggregation does not fit their type.
    pub aggregation_mismatches: u64,
    pub date_warnings: u64,
    pub keys: u64,
}

impl AddAssign for RunStats {
    fn add_assign(&mut self, rhs: Self) {
        self.lines_read += rhs.lines_read;
        self.lines_parsed += rhs.lines_parsed;
        self.lines_ignored += rhs.lines_ignored;
        self.lines_skipped += rhs.lines_skipped;
        self.lines_rejected += rhs.lines_rejected;
        self.aggregation_mismatches += rhs.aggregation_mismatches;
        self.date_warnings += rhs.date_warnings;
        self.keys += rhs.keys;
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read={}, parsed={}, ignored={}, skipped={}, rejected={}, mismatches={}, date_warnings={}, keys={}",
            self.lines_read,
            self.lines_parsed,
            self.lines_ignored,
            self.lines_skipped,
            self.lines_rejected,
            self.aggregation_mismatches,
            self.date_warnings,
            self.keys
        )
    }
}
