//! Typed error hierarchy for the journal engine.
//!
//! One enum covers the whole command surface: every variant maps to a
//! nonzero process status at the CLI edge. Persistence failures are reported
//! rather than crashed on, so journaling never takes down the test run it
//! observes.

use thiserror::Error;

/// Errors from the journal store, ledger, and metafile compiler.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("No journal found at {path}")]
    NotFound { path: std::path::PathBuf },

    #[error("Failed to read journal at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save journal to {path}: {source}")]
    WriteFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed journal document at {path}: {source}")]
    Malformed {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Metafile line {line}: {message}")]
    MetafileParse { line: usize, message: String },

    #[error("Metric name '{name}' is not unique within the open phase")]
    DuplicateMetricName { name: String },

    #[error("No phase is currently open")]
    NoOpenPhase,
}

impl JournalError {
    /// True when the journal file simply does not exist yet.
    pub fn is_not_found(&self) -> bool {
        matches!(self, JournalError::NotFound { .. })
    }
}
