//! Error types for the sync module.

use thiserror::Error;

/// Errors that can end a synchronization pass or a dataset operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote has no such dataset.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// The remote rejected a push because a record moved on since the pull.
    #[error("data conflict: {0}")]
    DataConflict(String),

    /// The remote refused the write for quota reasons.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// The remote could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// Any other remote failure.
    #[error("remote storage error: {0}")]
    RemoteStorage(String),

    /// A callback declined to continue, or the caller cancelled the pass.
    #[error("sync cancelled: {0}")]
    Cancelled(String),

    /// The conflict/merge retry budget ran out.
    #[error("out of retries after {0} attempts")]
    OutOfRetries(u32),

    /// Local storage operation failed.
    #[error("local storage error: {0}")]
    Local(#[from] syncset_store::StoreError),

    /// Key or dataset name rejected.
    #[error("validation error: {0}")]
    Validation(#[from] syncset_core::ValidationError),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::DatasetNotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::DataConflict(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled(_))
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
