//! Parallel map–combine–reduce compaction of log input.
//!
//! A run moves through [`Phase`]s:
//!
//! - **Splitting**: the input is cut into contiguous byte ranges on line boundaries.
//! - **Mapping**: each range is parsed by one worker of a rayon pool. Records sharing a key
//!   are merged into the worker's local table as they are produced.
//! - **Combining**: the per-chunk tables and counters are collected.
//! - **Reducing**: partial tables are merged pairwise into one table.
//! - **Finalized**: transient merge indexes are dropped and the table is handed back.
//!
//! Merge order across workers is unspecified; the record merge operators are associative and
//! commutative so the result does not depend on it.

mod observer;
mod semaphore;
mod stats;
mod table;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::ThreadPool;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::debug;

use crate::error::CompactResult;
use crate::ingestion::{LineOutcome, LineParser};
use crate::processing::record::Record;

pub use observer::{
    ExecutionEvent, ExecutionMetrics, ExecutionMetricsSnapshot, ExecutionObserver, Phase,
    TracingExecutionObserver,
};
pub use stats::RunStats;
pub use table::CompactedTable;

use semaphore::Semaphore;
use table::merge_tables;

/// Configuration for the [`CompactionEngine`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Number of worker threads.
    ///
    /// If `None`, uses the platform's available parallelism.
    pub num_threads: Option<usize>,
    /// Number of chunks the input is split into.
    ///
    /// If `None`, one chunk per worker thread.
    pub chunks: Option<usize>,
    /// Upper bound on concurrently mapped chunks.
    ///
    /// This is an additional throttle on top of `num_threads`.
    pub max_in_flight_chunks: usize,
    /// Ignore the first line of the input.
    pub skip_header: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let n = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            num_threads: Some(n),
            chunks: None,
            max_in_flight_chunks: n.max(1),
            skip_header: false,
        }
    }
}

/// Runs compaction on a dedicated worker pool.
pub struct CompactionEngine {
    pool: ThreadPool,
    opts: ExecutionOptions,
    observer: Option<Arc<dyn ExecutionObserver>>,
    metrics: Arc<ExecutionMetrics>,
}

impl CompactionEngine {
    /// Create a new engine with the given options.
    ///
    /// Zero thread, chunk or in-flight counts are raised to one.
    pub fn new(opts: ExecutionOptions) -> CompactResult<Self> {
        let n_threads = opts
            .num_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
            .max(1);

        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("compact-worker-{i}"))
            .build()?;

        Ok(Self {
            pool,
            opts,
            observer: None,
            metrics: Arc::new(ExecutionMetrics::new()),
        })
    }

    /// Attach an observer for execution events.
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Get a handle to real-time execution metrics.
    pub fn metrics(&self) -> Arc<ExecutionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Read `path` and compact its lines.
    pub fn compact_path(&self, parser: &LineParser, path: impl AsRef<Path>) -> CompactResult<CompactedTable> {
        let bytes = fs::read(path.as_ref())?;
        self.compact_bytes(parser, &bytes)
    }

    /// Compact an in-memory buffer of newline-separated lines.
    ///
    /// Fails only if a match file cannot be loaded; malformed lines are counted in
    /// [`CompactedTable::stats`].
    pub fn compact_bytes(&self, parser: &LineParser, input: &[u8]) -> CompactResult<CompactedTable> {
        self.pool.install(|| self.compact_impl(parser, input))
    }

    fn compact_impl(&self, parser: &LineParser, input: &[u8]) -> CompactResult<CompactedTable> {
        let start = Instant::now();
        self.metrics.begin_run();
        self.emit(ExecutionEvent::RunStarted {
            input_bytes: input.len(),
        });

        self.enter(Phase::Splitting);
        let n_chunks = self
            .opts
            .chunks
            .unwrap_or_else(rayon::current_num_threads)
            .max(1);
        let ranges = split_on_lines(input, n_chunks);

        self.enter(Phase::Mapping);
        let sem = Semaphore::new(self.opts.max_in_flight_chunks);
        let partials: Vec<(HashMap<String, Record>, RunStats)> = ranges
            .into_par_iter()
            .enumerate()
            .map(|(chunk, range)| {
                let permit = sem.acquire();
                if permit.waited() > Duration::ZERO {
                    self.metrics.on_throttle_wait(permit.waited());
                    self.emit(ExecutionEvent::ThrottleWaited {
                        duration: permit.waited(),
                    });
                }
                self.metrics.on_chunk_start();
                self.emit(ExecutionEvent::ChunkStarted {
                    chunk,
                    offset: range.start,
                    len: range.len(),
                });

                let skip_first = self.opts.skip_header && chunk == 0;
                let result = self.map_chunk(parser, &input[range], skip_first);

                if let Ok((table, stats)) = &result {
                    self.emit(ExecutionEvent::ChunkFinished {
                        chunk,
                        lines: stats.lines_read,
                        keys: table.len(),
                    });
                }
                self.metrics.on_chunk_end();
                result
            })
            .collect::<CompactResult<Vec<_>>>()?;

        self.enter(Phase::Combining);
        let mut stats = RunStats::default();
        let mut tables = Vec::with_capacity(partials.len());
        for (table, chunk_stats) in partials {
            stats += chunk_stats;
            tables.push(table);
        }

        self.enter(Phase::Reducing);
        let mut records = tables
            .into_par_iter()
            .reduce(HashMap::new, |a, b| {
                let (mut big, small) = if a.len() >= b.len() { (a, b) } else { (b, a) };
                merge_tables(&mut big, small);
                big
            });

        for record in records.values_mut() {
            record.shrink();
        }
        let table = CompactedTable::new(records, stats);

        self.enter(Phase::Finalized);
        self.metrics.end_run(start.elapsed());
        self.emit(ExecutionEvent::RunFinished {
            elapsed: start.elapsed(),
            metrics: self.metrics.snapshot(),
        });
        debug!(stats = %table.stats(), "run complete");
        Ok(table)
    }

    /// Parse one chunk and combine its records by key.
    fn map_chunk(
        &self,
        parser: &LineParser,
        chunk: &[u8],
        skip_first: bool,
    ) -> CompactResult<(HashMap<String, Record>, RunStats)> {
        let mut table: HashMap<String, Record> = HashMap::new();
        let mut stats = RunStats::default();

        for (i, raw) in lines(chunk).enumerate() {
            stats.lines_read += 1;
            self.metrics.on_line_read();
            if skip_first && i == 0 {
                stats.lines_ignored += 1;
                continue;
            }

            let line = String::from_utf8_lossy(raw);
            match parser.parse_line(&line)? {
                LineOutcome::Parsed(parsed) => {
                    stats.lines_parsed += 1;
                    stats.aggregation_mismatches += parsed.zeroed as u64;
                    stats.date_warnings += parsed.warnings as u64;
                    let record = parsed.record;
                    match table.entry(record.key().to_owned()) {
                        Entry::Occupied(mut e) => e.get_mut().merge(record),
                        Entry::Vacant(e) => {
                            e.insert(record);
                        }
                    }
                }
                LineOutcome::Ignored => stats.lines_ignored += 1,
                LineOutcome::Skipped(reason) => {
                    debug!(%reason, line = %line, "skipped line");
                    stats.lines_skipped += 1;
                }
                LineOutcome::Rejected { .. } => stats.lines_rejected += 1,
            }
        }
        Ok((table, stats))
    }

    fn enter(&self, phase: Phase) {
        self.metrics.set_phase(phase);
        self.emit(ExecutionEvent::PhaseChanged { phase });
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(obs) = &self.observer {
            obs.on_event(&event);
        }
    }
}

/// Lines of `chunk`, without the trailing newline; a final empty piece is dropped.
fn lines(chunk: &[u8]) -> impl Iterator<Item = &[u8]> {
    let body = chunk.strip_suffix(b"\n").unwrap_or(chunk);
    let empty = chunk.is_empty();
    body.split(|&b| b == b'\n').filter(move |_| !empty)
}

/// Split `input` into at most `n` contiguous ranges that end on line boundaries.
fn split_on_lines(input: &[u8], n: usize) -> Vec<Range<usize>> {
    if input.is_empty() {
        return Vec::new();
    }
    let target = input.len().div_ceil(n.max(1)).max(1);
    let mut out = Vec::with_capacity(n);
    let mut start = 0usize;
    while start < input.len() {
        let guess = (start + target).min(input.len());
        let end = match input[guess..].iter().position(|&b| b == b'\n') {
            Some(off) => guess + off + 1,
            None => input.len(),
        };
        // `guess` may already sit just after a newline.
        let end = if guess > start && input[guess - 1] == b'\n' { guess } else { end };
        out.push(start..end);
        start = end;
    }
    out
}
