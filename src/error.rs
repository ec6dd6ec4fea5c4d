use crate::report::IssueKind;
use std::path::PathBuf;
use thiserror::Error;

/// Which half of the delete-then-append write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePhase {
    Delete,
    Append,
}

impl std::fmt::Display for WritePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WritePhase::Delete => write!(f, "delete"),
            WritePhase::Append => write!(f, "append"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No CSV file found in {0}")]
    InputNotFound(PathBuf),

    #[error("Invalid date '{0}'")]
    InvalidDate(String),

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),

    #[error("Malformed composite value '{value}': expected 2 parts, found {parts}")]
    MalformedComposite { value: String, parts: usize },

    #[error("Required field '{0}' is null")]
    MissingField(String),

    #[error("Reference lookup against {table} failed: {message}")]
    ReferenceLookupFailed { table: String, message: String },

    #[error("Write to {table} failed during {phase}: {message}")]
    WriteWindowFailed {
        table: String,
        phase: WritePhase,
        message: String,
    },

    #[error("Archiving {source_file} failed: {message}")]
    ArchiveFailed { source_file: PathBuf, message: String },

    #[error("Feed '{0}' is already running")]
    RunLocked(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Layout rule error: {0}")]
    Layout(String),

    #[error("Run cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Polars error: {0}")]
    Polars(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl PipelineError {
    /// Issue recorded for a row-level failure; `None` for run-level errors.
    pub fn issue_kind(&self) -> Option<IssueKind> {
        match self {
            PipelineError::InvalidDate(_) => Some(IssueKind::InvalidDate),
            PipelineError::InvalidNumber(_) => Some(IssueKind::InvalidNumber),
            PipelineError::MalformedComposite { .. } => Some(IssueKind::MalformedComposite),
            PipelineError::MissingField(_) => Some(IssueKind::MissingField),
            _ => None,
        }
    }

    /// Row-level failures drop the offending row and let the run continue.
    pub fn is_row_level(&self) -> bool {
        self.issue_kind().is_some()
    }
}

impl From<polars::error::PolarsError> for PipelineError {
    fn from(e: polars::error::PolarsError) -> Self {
        PipelineError::Polars(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
