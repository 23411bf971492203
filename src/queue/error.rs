//! Error types for the work queue and its backing store

use crate::data::Disposition;
use thiserror::Error;

/// Failures of the key-value store itself
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the store
    #[error("Store connection failed: {0}")]
    Connection(String),

    /// The store rejected an operation
    #[error("Store operation {operation} failed: {details}")]
    Operation { operation: String, details: String },

    /// Snapshot file could not be read or written
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl StoreError {
    pub fn operation(operation: impl Into<String>, details: impl ToString) -> Self {
        Self::Operation {
            operation: operation.into(),
            details: details.to_string(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the dedup queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Entity payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An entity can only ever be blocked or clean, never both
    #[error("Entity {id} is already {existing}")]
    ConflictingDisposition { id: String, existing: Disposition },
}

impl QueueError {
    /// Store failures mean the queue cannot guarantee anything anymore
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
