//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during local storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Writes to a dataset that does not exist or was deleted locally.
    #[error("dataset not found: {identity_id}/{dataset_name}")]
    DatasetNotFound {
        identity_id: String,
        dataset_name: String,
    },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding storage state was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// A blocking storage task failed to complete.
    #[error("storage task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn dataset_not_found(identity_id: &str, dataset_name: &str) -> Self {
        Self::DatasetNotFound {
            identity_id: identity_id.to_string(),
            dataset_name: dataset_name.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
