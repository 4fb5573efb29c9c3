//! Error types for the export pipeline.
//!
//! Adapter and dependency failures abort the whole run; degenerate corpora
//! (empty, single document, identical vectors) are not errors.

use thiserror::Error;

use crate::storage::DatabaseError;

/// Errors that can abort an export run.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The requested collection does not exist in the store.
    #[error("collection '{name}' not found; available collections: [{}]", available.join(", "))]
    SourceUnavailable {
        name: String,
        available: Vec<String>,
    },

    /// A component the pipeline needs is absent.
    #[error("{component} is missing: {hint}")]
    DependencyMissing { component: String, hint: String },

    /// An embedding row does not share the dimension of the first row.
    #[error("embedding {index} has dimension {found}, expected {expected}")]
    ShapeMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl ExportError {
    /// Process exit status the binary reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExportError::SourceUnavailable { .. } => 2,
            ExportError::DependencyMissing { .. } => 3,
            ExportError::ShapeMismatch { .. } => 4,
            _ => 1,
        }
    }
}

/// Result type for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;
