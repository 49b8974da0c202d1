//! Dataset metadata and pull results.

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// `last_sync_count` value of a dataset deleted locally whose deletion has
/// not been pushed yet.
pub const DELETED_SYNC_COUNT: i64 = -1;

/// Bookkeeping kept for every dataset of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    pub dataset_name: String,
    pub creation_date: Option<i64>,
    pub last_modified_date: Option<i64>,
    pub last_modified_by: Option<String>,
    pub storage_size_bytes: i64,
    pub record_count: i64,
    pub last_sync_count: i64,
    pub last_sync_date: Option<i64>,
}

impl DatasetMetadata {
    pub fn new(dataset_name: impl Into<String>, now: i64) -> Self {
        Self {
            dataset_name: dataset_name.into(),
            creation_date: Some(now),
            last_modified_date: Some(now),
            ..Default::default()
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.last_sync_count == DELETED_SYNC_COUNT
    }
}

/// Everything one pull returned for a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetUpdates {
    pub dataset_name: String,
    /// Records changed after the requested sync count.
    pub records: Vec<Record>,
    /// The dataset's current sync count on the remote.
    pub sync_count: i64,
    /// Token authorizing the push that follows this pull.
    pub sync_session_token: String,
    pub exists: bool,
    /// The dataset was deleted remotely after the requested sync count.
    pub deleted: bool,
    pub merged_dataset_names: Vec<String>,
}
