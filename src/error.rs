//! Error types for document store operations.
//!
//! The façade surfaces four outcomes callers usually care about:
//! read failures, write failures, missing documents and domain validation
//! failures raised from inside a transaction function. The remaining
//! variants come from backends and argument validation.

use thiserror::Error;

/// Errors that can occur during document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading from the backend failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Writing to the backend failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Caller-defined precondition rejected by a transaction function.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Document already exists (for create-only writes).
    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// Document changed since it was read (optimistic concurrency conflict).
    #[error("version conflict on {path}: expected {expected}, found {found}")]
    Conflict {
        path: String,
        expected: u64,
        found: u64,
    },

    /// Transaction gave up after repeated conflicts.
    #[error("transaction failed after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    /// Malformed collection, document or field path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Argument rejected before reaching the backend.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database error from SQLx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Returns true if the operation may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Returns true for a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Collapse backend failures into `Read`, leaving domain errors intact.
    pub(crate) fn into_read(self) -> Self {
        match self {
            StoreError::Database(e) => StoreError::Read(e.to_string()),
            StoreError::Serialization(msg) => StoreError::Read(msg),
            other => other,
        }
    }

    /// Collapse backend failures into `Write`, leaving domain errors intact.
    pub(crate) fn into_write(self) -> Self {
        match self {
            StoreError::Database(e) => StoreError::Write(e.to_string()),
            StoreError::Serialization(msg) => StoreError::Write(msg),
            other => other,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
