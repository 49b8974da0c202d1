//! Error types for the sync manager.

use syncset_core::ValidationError;
use syncset_store::StoreError;
use syncset_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, ManagerError>;
