//! Error types for gatekeep-state

use thiserror::Error;

/// Errors raised by ledger backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A record with this run id was already appended
    #[error("validation run already recorded: {run_id}")]
    DuplicateRun { run_id: String },

    /// A revert with this id was already recorded
    #[error("revert already recorded: {revert_id}")]
    DuplicateRevert { revert_id: String },

    /// Digest string is not 64 lowercase hex chars
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Database connection error
    #[error("database connection failed: {0}")]
    Connection(String),

    /// Backend query or write failed
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
