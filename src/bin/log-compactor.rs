//! `log-compactor` command-line front end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use log_compactor::execution::{CompactionEngine, ExecutionOptions, TracingExecutionObserver};
use log_compactor::ingestion::{LineParser, MatchSets, ParseOptions};
use log_compactor::job::{
    self, CompositeObserver, FileObserver, Job, JobObserver, JobOptions, TracingJobObserver,
};
use log_compactor::output::OutputFormat;
use log_compactor::processing::ContentRetention;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
    Plain,
    Mem,
}

impl From<Format> for OutputFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Json => OutputFormat::Json,
            Format::Csv => OutputFormat::Csv,
            Format::Plain => OutputFormat::Plain,
            Format::Mem => OutputFormat::Mem,
        }
    }
}

/// Compact delimited log files into per-key aggregated records.
#[derive(Debug, Parser)]
#[command(name = "log-compactor", version, about)]
struct Cli {
    /// Schema file (JSON).
    #[arg(short, long)]
    schema: PathBuf,

    /// Input files, directories or glob patterns.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Worker threads (default: available parallelism).
    #[arg(short = 'j', long)]
    threads: Option<usize>,

    /// Number of chunks each input is split into (default: one per thread).
    #[arg(long)]
    chunks: Option<usize>,

    /// Output encoding.
    #[arg(short = 'f', long, value_enum, default_value_t = Format::Json)]
    output_format: Format,

    /// Output file (default: standard output).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Keep the original lines of every record.
    #[arg(long)]
    store_content: bool,

    /// Keep original lines zlib-compressed (implies --store-content).
    #[arg(long)]
    compressed: bool,

    /// Tag appended to every key (overrides the schema's app_name).
    #[arg(long)]
    app_name: Option<String>,

    /// Merge the results of all inputs into one table.
    #[arg(long)]
    merge_results: bool,

    /// With --merge-results, save a CSV snapshot after each input.
    #[arg(long, requires = "merge_results")]
    snapshot: bool,

    /// Skip the first line of every input.
    #[arg(long)]
    skip_header: bool,

    /// Do not write a CSV header row.
    #[arg(long)]
    no_header: bool,

    /// Number of keys in the top report.
    #[arg(long, default_value_t = 10)]
    top: usize,

    /// Also append one line per input outcome to this file.
    #[arg(long)]
    event_log: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn retention(&self) -> ContentRetention {
        if self.compressed {
            ContentRetention::Compressed
        } else if self.store_content {
            ContentRetention::Plain
        } else {
            ContentRetention::None
        }
    }

    fn observer(&self) -> Arc<dyn JobObserver> {
        match &self.event_log {
            Some(path) => {
                let tracing: Arc<dyn JobObserver> = Arc::new(TracingJobObserver);
                let file: Arc<dyn JobObserver> = Arc::new(FileObserver::new(path.clone()));
                Arc::new(CompositeObserver::new(vec![tracing, file]))
            }
            None => Arc::new(TracingJobObserver),
        }
    }

    fn default_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.default_filter())),
        )
        .init();

    let schema = job::load_schema(&cli.schema)
        .with_context(|| format!("loading schema {}", cli.schema.display()))?;

    let defaults = ExecutionOptions::default();
    let threads = cli.threads.or(defaults.num_threads);
    let execution = ExecutionOptions {
        num_threads: threads,
        chunks: cli.chunks,
        max_in_flight_chunks: threads.unwrap_or(defaults.max_in_flight_chunks).max(1),
        skip_header: cli.skip_header,
    };
    let engine = CompactionEngine::new(execution)
        .context("starting worker pool")?
        .with_observer(Arc::new(TracingExecutionObserver));

    let parser = LineParser::new(
        Arc::new(schema),
        Arc::new(MatchSets::default()),
        ParseOptions {
            app_name: cli.app_name.clone(),
            content: cli.retention(),
        },
    );

    let options = JobOptions {
        inputs: cli.inputs.clone(),
        format: cli.output_format.into(),
        output: cli.output.clone(),
        csv_header: !cli.no_header,
        merge_results: cli.merge_results,
        snapshot: cli.snapshot,
        top: cli.top,
        observer: Some(cli.observer()),
        ..JobOptions::default()
    };

    let report = Job::with_parts(engine, parser, options).run()?;

    for input in &report.inputs {
        tracing::info!(path = %input.path.display(), "top keys\n{}", input.top);
    }
    tracing::info!(
        inputs = report.inputs.len(),
        failed = report.failed,
        stats = %report.stats,
        "done"
    );
    if report.inputs.is_empty() {
        anyhow::bail!("no input could be compacted");
    }
    Ok(())
}
