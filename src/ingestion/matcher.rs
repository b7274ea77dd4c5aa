//! Per-field inclusion/exclusion predicates.
//!
//! A [`MatchRule`] compares a token against a set of literals, either a single literal or a
//! file of literals. File-backed sets are loaded on first use through a [`MatchSetLoader`]
//! and cached by field name in [`MatchSets`], so concurrent workers share one load.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{CompactError, CompactResult};
use crate::types::{FieldDef, MatchLogic, MatchRule, MatchSource};

/// Shared literal set of one field.
pub type MatchSet = Arc<HashSet<String>>;

/// Source of file-backed literal sets.
///
/// The default [`FileMatchSetLoader`] reads one literal per line; tests can inject fakes.
pub trait MatchSetLoader: Send + Sync {
    fn load(&self, path: &Path) -> std::io::Result<HashSet<String>>;
}

/// Reads a plain-text file, one literal per line; blank lines are ignored.
#[derive(Debug, Default)]
pub struct FileMatchSetLoader;

impl MatchSetLoader for FileMatchSetLoader {
    fn load(&self, path: &Path) -> std::io::Result<HashSet<String>> {
        let text = fs::read_to_string(path)?;
        Ok(text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

/// Lazily-populated, thread-safe cache of match sets keyed by field name.
pub struct MatchSets {
    loader: Arc<dyn MatchSetLoader>,
    sets: Mutex<HashMap<String, MatchSet>>,
}

impl fmt::Debug for MatchSets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .sets
            .lock()
            .map(|s| s.len())
            .unwrap_or_else(|p| p.into_inner().len());
        f.debug_struct("MatchSets").field("cached", &cached).finish()
    }
}

impl Default for MatchSets {
    fn default() -> Self {
        Self::new(Arc::new(FileMatchSetLoader))
    }
}

impl MatchSets {
    pub fn new(loader: Arc<dyn MatchSetLoader>) -> Self {
        Self {
            loader,
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// Return the literal set for `field`, building it on first use.
    ///
    /// The cache lock is held across the load so that only the first caller reads the file;
    /// other workers block and then reuse the cached set.
    pub fn get_or_load(&self, field: &str, rule: &MatchRule) -> CompactResult<MatchSet> {
        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = sets.get(field) {
            return Ok(Arc::clone(set));
        }

        let set: HashSet<String> = match &rule.source {
            MatchSource::Literal(lit) => HashSet::from([lit.clone()]),
            MatchSource::File(path) => {
                let set = self
                    .loader
                    .load(path)
                    .map_err(|source| CompactError::MatchFile {
                        field: field.to_owned(),
                        path: path.clone(),
                        source,
                    })?;
                debug!(field, path = %path.display(), literals = set.len(), "loaded match file");
                set
            }
        };
        let set = Arc::new(set);
        sets.insert(field.to_owned(), Arc::clone(&set));
        Ok(set)
    }

    /// Number of cached sets.
    pub fn cached(&self) -> usize {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Outcome of evaluating one field's rule against its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchVerdict {
    /// The rule is satisfied.
    Accept,
    /// The line must be dropped now.
    RejectLine,
    /// An `or` rule missed; the line survives only if another `or` field is satisfied.
    Continue,
}

/// Accumulates `or` outcomes across the fields of one line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrState {
    seen: bool,
    satisfied: bool,
}

impl OrState {
    /// `false` when the line had `or` fields and none of them was satisfied.
    pub fn keeps_line(&self) -> bool {
        !self.seen || self.satisfied
    }
}

/// Whether `token` hits any literal of `set`.
///
/// Exact rules compare whole tokens. Substring rules look for a literal inside the token;
/// negative substring rules also count a token contained in a literal as a hit.
pub fn hits(rule: &MatchRule, set: &HashSet<String>, token: &str) -> bool {
    if rule.exact {
        return set.contains(token);
    }
    if rule.negative {
        set.iter()
            .any(|lit| token.contains(lit.as_str()) || (!token.is_empty() && lit.contains(token)))
    } else {
        set.iter().any(|lit| token.contains(lit.as_str()))
    }
}

/// Evaluate `field`'s match rule (if any) against `token`, updating `or_state`.
///
/// Key fields always use `and` logic.
pub fn evaluate(
    sets: &MatchSets,
    field: &FieldDef,
    token: &str,
    or_state: &mut OrState,
) -> CompactResult<MatchVerdict> {
    let Some(rule) = &field.match_rule else {
        return Ok(MatchVerdict::Accept);
    };
    let set = sets.get_or_load(&field.name, rule)?;
    let good = hits(rule, &set, token) != rule.negative;

    let logic = if field.key { MatchLogic::And } else { rule.logic };
    Ok(match (logic, good) {
        (MatchLogic::And, true) => MatchVerdict::Accept,
        (MatchLogic::And, false) => MatchVerdict::RejectLine,
        (MatchLogic::Or, true) => {
            or_state.seen = true;
            or_state.satisfied = true;
            MatchVerdict::Accept
        }
        (MatchLogic::Or, false) => {
            or_state.seen = true;
            MatchVerdict::Continue
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rule(logic: MatchLogic, negative: bool, exact: bool, source: MatchSource) -> MatchRule {
        MatchRule {
            logic,
            negative,
            exact,
            source,
        }
    }

    fn field_with(rule: MatchRule) -> FieldDef {
        FieldDef::new("val", FieldType::String, 0).with_match(rule)
    }

    struct CountingLoader {
        loads: AtomicUsize,
        set: HashSet<String>,
    }

    impl MatchSetLoader for CountingLoader {
        fn load(&self, _path: &Path) -> std::io::Result<HashSet<String>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(self.set.clone())
        }
    }

    struct FailingLoader;

    impl MatchSetLoader for FailingLoader {
        fn load(&self, _path: &Path) -> std::io::Result<HashSet<String>> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
        }
    }

    #[test]
    fn substring_positive_and_logic() {
        let sets = MatchSets::default();
        let f = field_with(rule(
            MatchLogic::And,
            false,
            false,
            MatchSource::Literal("OK".into()),
        ));
        let mut st = OrState::default();
        assert_eq!(evaluate(&sets, &f, "OOKK", &mut st).unwrap(), MatchVerdict::Accept);
        assert_eq!(
            evaluate(&sets, &f, "KO", &mut st).unwrap(),
            MatchVerdict::RejectLine
        );
        assert!(st.keeps_line());
    }

    #[test]
    fn negative_rule_rejects_hits() {
        let sets = MatchSets::default();
        let f = field_with(rule(
            MatchLogic::And,
            true,
            false,
            MatchSource::Literal("KO".into()),
        ));
        let mut st = OrState::default();
        assert_eq!(
            evaluate(&sets, &f, "xKOx", &mut st).unwrap(),
            MatchVerdict::RejectLine
        );
        assert_eq!(evaluate(&sets, &f, "OOKK", &mut st).unwrap(), MatchVerdict::Accept);
    }

    #[test]
    fn exact_rule_compares_whole_tokens() {
        let sets = MatchSets::default();
        let f = field_with(rule(
            MatchLogic::And,
            false,
            true,
            MatchSource::Literal("OK".into()),
        ));
        let mut st = OrState::default();
        assert_eq!(evaluate(&sets, &f, "OK", &mut st).unwrap(), MatchVerdict::Accept);
        assert_eq!(
            evaluate(&sets, &f, "OOKK", &mut st).unwrap(),
            MatchVerdict::RejectLine
        );
    }

    #[test]
    fn or_logic_defers_rejection_to_end_of_line() {
        let sets = MatchSets::default();
        let f = field_with(rule(
            MatchLogic::Or,
            false,
            false,
            MatchSource::Literal("OK".into()),
        ));

        let mut missed = OrState::default();
        assert_eq!(
            evaluate(&sets, &f, "nope", &mut missed).unwrap(),
            MatchVerdict::Continue
        );
        assert!(!missed.keeps_line());

        let mut hit = OrState::default();
        evaluate(&sets, &f, "nope", &mut hit).unwrap();
        evaluate(&sets, &f, "OK", &mut hit).unwrap();
        assert!(hit.keeps_line());
    }

    #[test]
    fn key_fields_force_and_logic() {
        let sets = MatchSets::default();
        let f = field_with(rule(
            MatchLogic::Or,
            false,
            false,
            MatchSource::Literal("OK".into()),
        ))
        .key();
        let mut st = OrState::default();
        assert_eq!(
            evaluate(&sets, &f, "nope", &mut st).unwrap(),
            MatchVerdict::RejectLine
        );
    }

    #[test]
    fn file_set_is_loaded_once_across_threads() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            set: HashSet::from(["bad.example".to_string()]),
        });
        let sets = Arc::new(MatchSets::new(loader.clone()));
        let f = Arc::new(field_with(rule(
            MatchLogic::And,
            true,
            true,
            MatchSource::File(PathBuf::from("blacklist.txt")),
        )));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sets = Arc::clone(&sets);
                let f = Arc::clone(&f);
                std::thread::spawn(move || {
                    let mut st = OrState::default();
                    evaluate(&sets, &f, "bad.example", &mut st).unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), MatchVerdict::RejectLine);
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(sets.cached(), 1);
    }

    #[test]
    fn failing_load_is_a_match_file_error() {
        let sets = MatchSets::new(Arc::new(FailingLoader));
        let f = field_with(rule(
            MatchLogic::And,
            false,
            true,
            MatchSource::File(PathBuf::from("missing.txt")),
        ));
        let mut st = OrState::default();
        let err = evaluate(&sets, &f, "x", &mut st).unwrap_err();
        assert!(matches!(err, CompactError::MatchFile { ref field, .. } if field == "val"));
    }
}
