//! Engine-wide error taxonomy.
//!
//! Each subsystem defines its own error enum next to the code that raises
//! it; `RagError` aggregates them at the service boundary. Per-document and
//! per-job errors are caught at the job boundary and recorded; only storage
//! failures escalate to pausing the queue.

use crate::embedding::EmbeddingError;
use crate::processing::ParseError;
use crate::types::{CollectionId, DocumentId};
use crate::watcher::WatchError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reaching the metadata database or a vector segment.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector segment corrupt at {path}: {reason}")]
    CorruptSegment { path: PathBuf, reason: String },

    #[error("vector dimension mismatch: segment is {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("no vector segment for collection {0}")]
    SegmentMissing(CollectionId),
}

/// Top-level error type returned by [`crate::service::RagService`].
#[derive(Error, Debug)]
pub enum RagError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Identical content already indexed. Not a failure; callers report
    /// the ingest as skipped.
    #[error("content already indexed as document {existing}")]
    DuplicateContent { existing: DocumentId },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("file exceeds size cap: {path} is {size} bytes (cap {cap})")]
    FileTooLarge { path: PathBuf, size: u64, cap: u64 },
}

impl RagError {
    /// Convenience constructor for unknown-id errors.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Embedding, timeout, and storage failures are transient classes;
    /// parse failures are not retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Embedding(_) | Self::Storage(_) | Self::Timeout { .. }
        )
    }
}

/// Result alias used throughout the engine.
pub type RagResult<T> = Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let timeout = RagError::Timeout { seconds: 300 };
        assert!(timeout.is_retryable());

        let parse = RagError::Parse(ParseError::InvalidUtf8 { offset: 0 });
        assert!(!parse.is_retryable());

        let not_found = RagError::not_found("document", 9);
        assert!(!not_found.is_retryable());
    }
}
