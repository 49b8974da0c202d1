//! Error types for syncset core.

use thiserror::Error;

/// Rejected record keys and dataset names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record key must not be empty")]
    EmptyKey,

    #[error("record key exceeds {max} characters: {len}")]
    KeyTooLong { len: usize, max: usize },

    #[error("record key contains invalid characters: {0:?}")]
    InvalidKey(String),

    #[error("dataset name must not be empty")]
    EmptyDatasetName,

    #[error("dataset name exceeds {max} characters: {len}")]
    DatasetNameTooLong { len: usize, max: usize },

    #[error("dataset name contains invalid characters: {0:?}")]
    InvalidDatasetName(String),
}
