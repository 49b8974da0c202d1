//! Decorators around the storage, remote and identity seams.
//!
//! Each wrapper delegates to a real implementation and either records
//! what passed through it or lets a test pause it at a known point.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use syncset_core::{DatasetMetadata, DatasetUpdates, Record};
use syncset_store::{LocalStorage, Result as StoreResult};
use syncset_sync::{IdentityProvider, RemoteStorage, Result as SyncResult};

// ─────────────────────────────────────────────────────────────────────────────
// RecordingStorage
// ─────────────────────────────────────────────────────────────────────────────

/// A write observed by [`RecordingStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    CreateDataset(String),
    UpdateDatasetMetadata(Vec<String>),
    DeleteDataset(String),
    PurgeDataset(String),
    PutValue { key: String, value: Option<String> },
    PutAllValues(Vec<String>),
    /// Keys written, in order.
    PutRecords(Vec<String>),
    UpdateLastSyncCount(i64),
    ChangeIdentityId { old: String, new: String },
    WipeData,
}

/// Local storage that logs every write before delegating it.
pub struct RecordingStorage {
    inner: Arc<dyn LocalStorage>,
    log: Mutex<Vec<StorageCall>>,
}

impl RecordingStorage {
    pub fn new(inner: Arc<dyn LocalStorage>) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, call: StorageCall) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Every value passed to `update_last_sync_count`, in order.
    pub fn sync_count_updates(&self) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StorageCall::UpdateLastSyncCount(count) => Some(count),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl LocalStorage for RecordingStorage {
    async fn create_dataset(&self, identity_id: &str, dataset_name: &str) -> StoreResult<()> {
        self.push(StorageCall::CreateDataset(dataset_name.to_string()));
        self.inner.create_dataset(identity_id, dataset_name).await
    }

    async fn get_dataset_metadata_list(
        &self,
        identity_id: &str,
    ) -> StoreResult<Vec<DatasetMetadata>> {
        self.inner.get_dataset_metadata_list(identity_id).await
    }

    async fn get_dataset_metadata(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> StoreResult<Option<DatasetMetadata>> {
        self.inner
            .get_dataset_metadata(identity_id, dataset_name)
            .await
    }

    async fn update_dataset_metadata(
        &self,
        identity_id: &str,
        metadata: &[DatasetMetadata],
    ) -> StoreResult<()> {
        self.push(StorageCall::UpdateDatasetMetadata(
            metadata.iter().map(|m| m.dataset_name.clone()).collect(),
        ));
        self.inner
            .update_dataset_metadata(identity_id, metadata)
            .await
    }

    async fn delete_dataset(&self, identity_id: &str, dataset_name: &str) -> StoreResult<()> {
        self.push(StorageCall::DeleteDataset(dataset_name.to_string()));
        self.inner.delete_dataset(identity_id, dataset_name).await
    }

    async fn purge_dataset(&self, identity_id: &str, dataset_name: &str) -> StoreResult<()> {
        self.push(StorageCall::PurgeDataset(dataset_name.to_string()));
        self.inner.purge_dataset(identity_id, dataset_name).await
    }

    async fn get_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> StoreResult<Option<String>> {
        self.inner.get_value(identity_id, dataset_name, key).await
    }

    async fn put_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
    ) -> StoreResult<()> {
        self.push(StorageCall::PutValue {
            key: key.to_string(),
            value: value.map(str::to_string),
        });
        self.inner
            .put_value(identity_id, dataset_name, key, value)
            .await
    }

    async fn get_value_map(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> StoreResult<BTreeMap<String, String>> {
        self.inner.get_value_map(identity_id, dataset_name).await
    }

    async fn put_all_values(
        &self,
        identity_id: &str,
        dataset_name: &str,
        values: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        self.push(StorageCall::PutAllValues(values.keys().cloned().collect()));
        self.inner
            .put_all_values(identity_id, dataset_name, values)
            .await
    }

    async fn get_record(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> StoreResult<Option<Record>> {
        self.inner.get_record(identity_id, dataset_name, key).await
    }

    async fn get_records(&self, identity_id: &str, dataset_name: &str) -> StoreResult<Vec<Record>> {
        self.inner.get_records(identity_id, dataset_name).await
    }

    async fn get_modified_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> StoreResult<Vec<Record>> {
        self.inner
            .get_modified_records(identity_id, dataset_name)
            .await
    }

    async fn put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
    ) -> StoreResult<()> {
        self.push(StorageCall::PutRecords(
            records.iter().map(|r| r.key.clone()).collect(),
        ));
        self.inner
            .put_records(identity_id, dataset_name, records)
            .await
    }

    async fn get_last_sync_count(&self, identity_id: &str, dataset_name: &str) -> StoreResult<i64> {
        self.inner
            .get_last_sync_count(identity_id, dataset_name)
            .await
    }

    async fn update_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> StoreResult<()> {
        self.push(StorageCall::UpdateLastSyncCount(last_sync_count));
        self.inner
            .update_last_sync_count(identity_id, dataset_name, last_sync_count)
            .await
    }

    async fn change_identity_id(
        &self,
        old_identity_id: &str,
        new_identity_id: &str,
    ) -> StoreResult<()> {
        self.push(StorageCall::ChangeIdentityId {
            old: old_identity_id.to_string(),
            new: new_identity_id.to_string(),
        });
        self.inner
            .change_identity_id(old_identity_id, new_identity_id)
            .await
    }

    async fn wipe_data(&self) -> StoreResult<()> {
        self.push(StorageCall::WipeData);
        self.inner.wipe_data().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GatedRemote
// ─────────────────────────────────────────────────────────────────────────────

/// A remote whose `list_updates` can be held open after the pull has been
/// served, so a test can act while a pass is in flight.
///
/// While held, each `list_updates` signals [`GatedRemote::entered`] and then
/// waits for [`GatedRemote::release`].
pub struct GatedRemote {
    inner: Arc<dyn RemoteStorage>,
    holding: AtomicBool,
    entered: Notify,
    release: Semaphore,
    pulls: AtomicUsize,
}

impl GatedRemote {
    pub fn new(inner: Arc<dyn RemoteStorage>) -> Self {
        Self {
            inner,
            holding: AtomicBool::new(false),
            entered: Notify::new(),
            release: Semaphore::new(0),
            pulls: AtomicUsize::new(0),
        }
    }

    /// Hold the next pulls until released.
    pub fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    /// Wait until a held pull is in progress.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Stop holding and let one waiting pull continue.
    pub fn release(&self) {
        self.holding.store(false, Ordering::SeqCst);
        self.release.add_permits(1);
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStorage for GatedRemote {
    async fn list_datasets(&self) -> SyncResult<Vec<DatasetMetadata>> {
        self.inner.list_datasets().await
    }

    async fn list_updates(
        &self,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> SyncResult<DatasetUpdates> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let updates = self.inner.list_updates(dataset_name, last_sync_count).await?;
        if self.holding.load(Ordering::SeqCst) {
            self.entered.notify_one();
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
        }
        Ok(updates)
    }

    async fn put_records(
        &self,
        dataset_name: &str,
        records: &[Record],
        sync_session_token: &str,
    ) -> SyncResult<Vec<Record>> {
        self.inner
            .put_records(dataset_name, records, sync_session_token)
            .await
    }

    async fn delete_dataset(&self, dataset_name: &str) -> SyncResult<()> {
        self.inner.delete_dataset(dataset_name).await
    }

    async fn get_dataset_metadata(&self, dataset_name: &str) -> SyncResult<DatasetMetadata> {
        self.inner.get_dataset_metadata(dataset_name).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CountingIdentity
// ─────────────────────────────────────────────────────────────────────────────

/// An identity provider that counts how often it is asked.
pub struct CountingIdentity {
    inner: Arc<dyn IdentityProvider>,
    lookups: AtomicUsize,
}

impl CountingIdentity {
    pub fn new(inner: Arc<dyn IdentityProvider>) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for CountingIdentity {
    fn identity_id(&self) -> String {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.identity_id()
    }
}
