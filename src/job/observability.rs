use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::error::CompactError;
use crate::execution::RunStats;
use crate::output::OutputFormat;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal, e.g. a missing input that was skipped).
    Warning,
    /// Error-level event (an input could not be compacted).
    Error,
    /// Critical error (I/O, match files, sinks).
    Critical,
}

impl JobSeverity {
    /// Severity of a failed input.
    pub fn for_error(e: &CompactError) -> Self {
        if e.is_infrastructure() {
            Self::Critical
        } else {
            Self::Error
        }
    }
}

/// Context about one input of a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// The input path.
    pub path: PathBuf,
    /// Output encoding of the job.
    pub format: OutputFormat,
}

/// Observer interface for per-input job outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait JobObserver: Send + Sync {
    /// Called when an input was compacted.
    fn on_success(&self, _ctx: &JobContext, _stats: &RunStats) {}

    /// Called when an input could not be compacted.
    fn on_failure(&self, _ctx: &JobContext, _severity: JobSeverity, _error: &CompactError) {}

    /// Called when a failure meets the job's alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &JobContext, severity: JobSeverity, error: &CompactError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Forwards every callback to each inner observer in turn.
#[derive(Default)]
pub struct CompositeObserver {
    inner: Vec<Arc<dyn JobObserver>>,
}

impl CompositeObserver {
    pub fn new(inner: Vec<Arc<dyn JobObserver>>) -> Self {
        Self { inner }
    }

    pub fn push(&mut self, observer: Arc<dyn JobObserver>) {
        self.inner.push(observer);
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompositeObserver({} observers)", self.inner.len())
    }
}

impl JobObserver for CompositeObserver {
    fn on_success(&self, ctx: &JobContext, stats: &RunStats) {
        self.inner.iter().for_each(|o| o.on_success(ctx, stats));
    }

    fn on_failure(&self, ctx: &JobContext, severity: JobSeverity, err: &CompactError) {
        self.inner.iter().for_each(|o| o.on_failure(ctx, severity, err));
    }

    fn on_alert(&self, ctx: &JobContext, severity: JobSeverity, err: &CompactError) {
        self.inner.iter().for_each(|o| o.on_alert(ctx, severity, err));
    }
}

/// Logs job events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingJobObserver;

impl JobObserver for TracingJobObserver {
    fn on_success(&self, ctx: &JobContext, stats: &RunStats) {
        info!(format = %ctx.format, path = %ctx.path.display(), %stats, "input compacted");
    }

    fn on_failure(&self, ctx: &JobContext, severity: JobSeverity, err: &CompactError) {
        if severity >= JobSeverity::Error {
            error!(?severity, path = %ctx.path.display(), error = %err, "input failed");
        } else {
            warn!(?severity, path = %ctx.path.display(), error = %err, "input skipped");
        }
    }

    fn on_alert(&self, ctx: &JobContext, severity: JobSeverity, err: &CompactError) {
        error!(alert = true, ?severity, path = %ctx.path.display(), error = %err, "input failed");
    }
}

/// Appends one tab-separated line per job event to a file (`--event-log`).
///
/// Lines look like `<unix-ts>\t<event>\t<path>\t<details>`. Write failures are ignored.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    writes: Mutex<()>,
}

impl FileObserver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record(&self, event: &str, ctx: &JobContext, details: fmt::Arguments<'_>) {
        let _serialized = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let file = OpenOptions::new().create(true).append(true).open(&self.path);
        if let Ok(mut file) = file {
            let _ = writeln!(
                file,
                "{}\t{event}\t{}\t{details}",
                unix_ts(),
                ctx.path.display()
            );
        }
    }
}

impl JobObserver for FileObserver {
    fn on_success(&self, ctx: &JobContext, stats: &RunStats) {
        self.record("compacted", ctx, format_args!("format={} {stats}", ctx.format));
    }

    fn on_failure(&self, ctx: &JobContext, severity: JobSeverity, err: &CompactError) {
        self.record("failed", ctx, format_args!("severity={severity:?} {err}"));
    }

    fn on_alert(&self, ctx: &JobContext, severity: JobSeverity, err: &CompactError) {
        self.record("ALERT", ctx, format_args!("severity={severity:?} {err}"));
    }
}

pub(crate) fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
