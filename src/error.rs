use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for compaction operations.
pub type CompactResult<T> = Result<T, CompactError>;

/// Error type returned by schema loading, parsing, execution and rendering.
///
/// Only run-level failures live here. Per-line anomalies (bad token counts, out of range
/// positions, unparseable dates) are recovered locally and surface as
/// [`crate::ingestion::SkipReason`] values and run metrics instead.
#[derive(Debug, Error)]
pub enum CompactError {
    /// Underlying I/O error (e.g. input file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The schema document is not valid JSON or does not match the schema layout.
    #[error("schema decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV rendering error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The schema is structurally invalid (duplicate names, dangling ratio operands, ...).
    #[error("schema error: {message}")]
    Schema { message: String },

    /// A run option has an unsupported value.
    #[error("invalid option: {message}")]
    InvalidOption { message: String },

    /// A match file referenced by a field's match rule could not be read.
    #[error("failed to load match file '{}' for field '{field}': {source}", path.display())]
    MatchFile {
        field: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The configured output sink could not be opened or written.
    #[error("output sink '{}' unavailable: {source}", path.display())]
    OutputSink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompactError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_option(message: impl Into<String>) -> Self {
        Self::InvalidOption {
            message: message.into(),
        }
    }

    /// Returns `true` for errors caused by the environment rather than by the inputs.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ThreadPool(_) | Self::MatchFile { .. } | Self::OutputSink { .. }
        )
    }
}
