//! Multi-input compaction runs.
//!
//! A [`Job`] compacts each input with one shared [`CompactionEngine`] and [`LineParser`],
//! then either renders every input's table as it completes or, with
//! [`JobOptions::merge_results`], folds all tables into one and renders it at the end.
//! CSV rows of separate inputs are collected and written together under one header.
//!
//! Only a schema, a match file or the output sink failing stops a job. An input that is
//! missing or unreadable is reported to the [`JobObserver`] and skipped.

mod observability;

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{CompactError, CompactResult};
use crate::execution::{CompactedTable, CompactionEngine, ExecutionOptions, RunStats};
use crate::ingestion::{LineParser, MatchSets, ParseOptions};
use crate::output::csv::CsvRows;
use crate::output::{self, OutputFormat, TopReport};
use crate::types::Schema;

pub use observability::{
    CompositeObserver, FileObserver, JobContext, JobObserver, JobSeverity, TracingJobObserver,
};

/// Name used for the sink when writing to standard output.
const STDOUT_SINK: &str = "-";

/// Options controlling a [`Job`].
#[derive(Clone)]
pub struct JobOptions {
    /// Files, directories (walked recursively) or glob patterns.
    pub inputs: Vec<PathBuf>,
    pub format: OutputFormat,
    /// Output file; standard output when `None`.
    pub output: Option<PathBuf>,
    /// Write a CSV header before the first row.
    pub csv_header: bool,
    /// Merge the tables of all inputs and render once.
    pub merge_results: bool,
    /// With `merge_results`, save the merged table as CSV after each input.
    pub snapshot: bool,
    /// Size of the per-table [`TopReport`].
    pub top: usize,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn JobObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: JobSeverity,
}

impl fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOptions")
            .field("inputs", &self.inputs)
            .field("format", &self.format)
            .field("output", &self.output)
            .field("csv_header", &self.csv_header)
            .field("merge_results", &self.merge_results)
            .field("snapshot", &self.snapshot)
            .field("top", &self.top)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            format: OutputFormat::Json,
            output: None,
            csv_header: true,
            merge_results: false,
            snapshot: false,
            top: 10,
            observer: None,
            alert_at_or_above: JobSeverity::Critical,
        }
    }
}

/// Outcome of one input.
#[derive(Debug, Clone)]
pub struct InputReport {
    pub path: PathBuf,
    pub stats: RunStats,
    pub top: TopReport,
}

/// Outcome of a whole job.
#[derive(Debug, Default)]
pub struct JobReport {
    pub inputs: Vec<InputReport>,
    /// Inputs that were missing or failed.
    pub failed: usize,
    /// Counters of all compacted inputs added together.
    pub stats: RunStats,
    /// Report of the merged table, with `merge_results`.
    pub merged_top: Option<TopReport>,
    /// Tables handed back with [`OutputFormat::Mem`]: one per input, or the merged one.
    pub tables: Vec<CompactedTable>,
}

/// A configured compaction run over several inputs.
pub struct Job {
    engine: CompactionEngine,
    parser: LineParser,
    options: JobOptions,
}

impl Job {
    pub fn new(
        schema: Schema,
        parse: ParseOptions,
        execution: ExecutionOptions,
        options: JobOptions,
    ) -> CompactResult<Self> {
        schema.validate()?;
        let parser = LineParser::new(Arc::new(schema), Arc::new(MatchSets::default()), parse);
        Ok(Self {
            engine: CompactionEngine::new(execution)?,
            parser,
            options,
        })
    }

    /// Use a pre-built engine and parser (custom match-set loaders, observers).
    pub fn with_parts(engine: CompactionEngine, parser: LineParser, options: JobOptions) -> Self {
        Self {
            engine,
            parser,
            options,
        }
    }

    pub fn engine(&self) -> &CompactionEngine {
        &self.engine
    }

    /// Compact every input and render the results.
    pub fn run(&self) -> CompactResult<JobReport> {
        let opts = &self.options;
        let (sink_path, mut sink) = self.open_sink()?;
        let mut report = JobReport::default();
        let mut merged: Option<CompactedTable> = None;
        let mut csv_rows = CsvRows::default();

        for path in expand_inputs(&opts.inputs) {
            let ctx = JobContext {
                path: path.clone(),
                format: opts.format,
            };
            if !path.is_file() {
                let err = CompactError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("input '{}' not found", path.display()),
                ));
                warn!(path = %path.display(), "input not found; skipping");
                self.notify_failure(&ctx, JobSeverity::Warning, &err);
                report.failed += 1;
                continue;
            }

            let table = match self.engine.compact_path(&self.parser, &path) {
                Ok(t) => t,
                Err(e @ CompactError::MatchFile { .. }) => {
                    self.notify_failure(&ctx, JobSeverity::for_error(&e), &e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "input failed; skipping");
                    self.notify_failure(&ctx, JobSeverity::for_error(&e), &e);
                    report.failed += 1;
                    continue;
                }
            };

            let stats = *table.stats();
            let top = TopReport::from_table(&table, opts.top);
            info!(path = %path.display(), %stats, "compacted input");
            if let Some(obs) = &opts.observer {
                obs.on_success(&ctx, &stats);
            }
            report.stats += stats;
            report.inputs.push(InputReport {
                path: path.clone(),
                stats,
                top,
            });

            if opts.merge_results {
                let acc = merged.get_or_insert_with(CompactedTable::default);
                acc.merge(table);
                if opts.snapshot {
                    self.save_snapshot(acc);
                }
            } else {
                match opts.format {
                    OutputFormat::Mem => report.tables.push(table),
                    // Written once at the end so every row shares the header.
                    OutputFormat::Csv => csv_rows.extend(table.ranked()),
                    _ => write_table(&table, opts.format, &mut sink, opts.csv_header, &sink_path)?,
                }
            }
        }

        if !csv_rows.is_empty() {
            csv_rows
                .write(&mut sink, opts.csv_header)
                .map_err(|e| sink_error(e, &sink_path))?;
        }

        if let Some(table) = merged {
            let top = TopReport::from_table(&table, opts.top);
            info!(keys = top.total_keys, logs = top.total_logs, "merged results\n{top}");
            report.merged_top = Some(top);
            if opts.format == OutputFormat::Mem {
                report.tables.push(table);
            } else {
                write_table(&table, opts.format, &mut sink, opts.csv_header, &sink_path)?;
            }
        }

        sink.flush().map_err(|source| CompactError::OutputSink {
            path: sink_path.clone(),
            source,
        })?;
        Ok(report)
    }

    fn open_sink(&self) -> CompactResult<(PathBuf, Box<dyn Write>)> {
        match (&self.options.output, self.options.format) {
            (_, OutputFormat::Mem) => Ok((PathBuf::from(STDOUT_SINK), Box::new(io::sink()))),
            (Some(path), _) => {
                let file = File::create(path).map_err(|source| CompactError::OutputSink {
                    path: path.clone(),
                    source,
                })?;
                Ok((path.clone(), Box::new(BufWriter::new(file))))
            }
            (None, _) => Ok((
                PathBuf::from(STDOUT_SINK),
                Box::new(BufWriter::new(io::stdout().lock())),
            )),
        }
    }

    /// Best-effort CSV copy of the merged table next to the output file.
    fn save_snapshot(&self, table: &CompactedTable) {
        let path = snapshot_path(self.options.output.as_deref(), observability::unix_ts());
        let result = File::create(&path)
            .map_err(CompactError::from)
            .and_then(|f| output::render(table, OutputFormat::Csv, BufWriter::new(f), true));
        match result {
            Ok(()) => info!(path = %path.display(), keys = table.len(), "snapshot saved"),
            Err(e) => warn!(path = %path.display(), error = %e, "snapshot failed"),
        }
    }

    fn notify_failure(&self, ctx: &JobContext, severity: JobSeverity, err: &CompactError) {
        if let Some(obs) = &self.options.observer {
            obs.on_failure(ctx, severity, err);
            if severity >= self.options.alert_at_or_above {
                obs.on_alert(ctx, severity, err);
            }
        }
    }
}

fn write_table(
    table: &CompactedTable,
    format: OutputFormat,
    sink: &mut dyn Write,
    header: bool,
    sink_path: &Path,
) -> CompactResult<()> {
    output::render(table, format, sink, header).map_err(|e| sink_error(e, sink_path))
}

/// I/O failures while rendering belong to the sink.
fn sink_error(err: CompactError, sink_path: &Path) -> CompactError {
    match err {
        CompactError::Io(source) => CompactError::OutputSink {
            path: sink_path.to_path_buf(),
            source,
        },
        other => other,
    }
}

/// `<stem>_<ts>.csv` next to `output`, or `compacted_<ts>.csv` in the working directory.
fn snapshot_path(output: Option<&Path>, ts: u64) -> PathBuf {
    let (dir, stem) = match output {
        Some(p) => (
            p.parent().map(Path::to_path_buf).unwrap_or_default(),
            p.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "compacted".to_owned()),
        ),
        None => (PathBuf::new(), "compacted".to_owned()),
    };
    dir.join(format!("{stem}_{ts}.csv"))
}

/// Expand directories (recursively, sorted) and glob patterns; plain paths pass through.
pub fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for input in inputs {
        let text = input.to_string_lossy();
        if text.contains(['*', '?', '[']) {
            match glob::glob(&text) {
                Ok(paths) => {
                    let mut found: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
                    if found.is_empty() {
                        warn!(pattern = %text, "pattern matched no input");
                    }
                    found.sort();
                    out.extend(found);
                }
                Err(e) => {
                    warn!(pattern = %text, error = %e, "invalid input pattern");
                }
            }
        } else if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect();
            found.sort();
            out.extend(found);
        } else {
            out.push(input.clone());
        }
    }
    out
}

/// Read and validate a schema file; convenience for [`Job::new`].
pub fn load_schema(path: impl AsRef<Path>) -> CompactResult<Schema> {
    let path = path.as_ref();
    let schema = Schema::from_path(path)?;
    info!(
        path = %path.display(),
        name = %schema.name,
        version = schema.version,
        fields = schema.fields.len(),
        "schema loaded"
    );
    Ok(schema)
}
