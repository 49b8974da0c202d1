//! LocalStorage trait: the interface the sync engine needs from a
//! persistence backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use syncset_core::{DatasetMetadata, Record};

use crate::error::Result;

/// Async interface for dataset persistence.
///
/// Reads of an absent dataset return empty results (or 0 for the sync
/// count). Record writes to a dataset that is absent or deleted locally
/// fail with [`StoreError::DatasetNotFound`](crate::StoreError::DatasetNotFound).
#[async_trait]
pub trait LocalStorage: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Datasets
    // ─────────────────────────────────────────────────────────────────────────

    /// Create metadata for a dataset if it does not exist yet.
    async fn create_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()>;

    /// Metadata of every dataset owned by an identity, including datasets
    /// deleted locally but not yet purged.
    async fn get_dataset_metadata_list(&self, identity_id: &str) -> Result<Vec<DatasetMetadata>>;

    async fn get_dataset_metadata(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Option<DatasetMetadata>>;

    /// Upsert metadata reported by the remote. Sync counts and records are
    /// left untouched.
    async fn update_dataset_metadata(
        &self,
        identity_id: &str,
        metadata: &[DatasetMetadata],
    ) -> Result<()>;

    /// Drop all records and mark the dataset deleted (`last_sync_count = -1`).
    async fn delete_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()>;

    /// Remove every trace of a dataset.
    async fn purge_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Values
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<String>>;

    /// Write a value locally; `None` writes a tombstone. Unchanged values
    /// are a no-op.
    async fn put_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()>;

    /// All live (non-tombstone) values.
    async fn get_value_map(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<BTreeMap<String, String>>;

    async fn put_all_values(
        &self,
        identity_id: &str,
        dataset_name: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_record(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<Record>>;

    /// All records including tombstones, ordered by key.
    async fn get_records(&self, identity_id: &str, dataset_name: &str) -> Result<Vec<Record>>;

    /// Records with unsynced local changes.
    async fn get_modified_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Vec<Record>>;

    /// Upsert records verbatim, last write wins per key.
    async fn put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Sync state
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_last_sync_count(&self, identity_id: &str, dataset_name: &str) -> Result<i64>;

    /// Store the sync count and stamp the sync date.
    async fn update_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    /// Move every dataset of `old_identity_id` to `new_identity_id`.
    ///
    /// A dataset whose name the new identity already uses is renamed
    /// `<name>.<old_identity_id>`, or `<name>.<old_identity_id>.<n>` with the
    /// smallest `n >= 2` that is free. Datasets move in name order.
    async fn change_identity_id(&self, old_identity_id: &str, new_identity_id: &str)
        -> Result<()>;

    /// Remove all data of all identities.
    async fn wipe_data(&self) -> Result<()>;
}

/// Name a reparented dataset takes when the new identity already owns one
/// with the same name. `taken` reports whether a candidate is in use.
pub fn merged_dataset_name<E>(
    dataset_name: &str,
    old_identity_id: &str,
    mut taken: impl FnMut(&str) -> std::result::Result<bool, E>,
) -> std::result::Result<String, E> {
    let base = format!("{dataset_name}.{old_identity_id}");
    if !taken(&base)? {
        return Ok(base);
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{base}.{n}");
        if !taken(&candidate)? {
            return Ok(candidate);
        }
        n += 1;
    }
}
