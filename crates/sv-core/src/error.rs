use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SvError {
    #[error("Invalid record at row {row}: {reason}")]
    InvalidRecord { row: usize, reason: String },

    #[error("Degenerate data: {0}")]
    DegenerateData(String),

    #[error("Trace not found at {}", .0.display())]
    TraceNotFound(PathBuf),

    #[error("Feature shape mismatch: expected {expected} features, got {actual}")]
    FeatureShape { expected: usize, actual: usize },

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Unreadable source table: {0}")]
    Source(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SvError {
    /// Table-level problems (missing header columns) have no single row.
    pub fn invalid_table(reason: impl Into<String>) -> Self {
        SvError::InvalidRecord {
            row: 0,
            reason: reason.into(),
        }
    }
}

pub type SvResult<T> = Result<T, SvError>;
