//! Remote storage abstraction.
//!
//! The remote is authoritative for sync counts. Implementations may use
//! HTTP or any other transport; [`memory::MemoryRemote`] keeps everything
//! in process.

use async_trait::async_trait;
use syncset_core::{DatasetMetadata, DatasetUpdates, Record};

use crate::error::Result;

/// The capabilities the sync engine needs from a remote store.
///
/// Errors use the remote taxonomy of [`SyncError`](crate::SyncError):
/// `DatasetNotFound`, `DataConflict`, `LimitExceeded`, `Network` and
/// `RemoteStorage` for everything else.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Metadata of every dataset the identity has remotely.
    async fn list_datasets(&self) -> Result<Vec<DatasetMetadata>>;

    /// Records changed after `last_sync_count` (0 for a full listing),
    /// collected across all pages.
    async fn list_updates(&self, dataset_name: &str, last_sync_count: i64)
        -> Result<DatasetUpdates>;

    /// Apply local changes. A `None` value removes the key. Fails with
    /// `DataConflict` when any record's sync count is stale.
    async fn put_records(
        &self,
        dataset_name: &str,
        records: &[Record],
        sync_session_token: &str,
    ) -> Result<Vec<Record>>;

    async fn delete_dataset(&self, dataset_name: &str) -> Result<()>;

    async fn get_dataset_metadata(&self, dataset_name: &str) -> Result<DatasetMetadata>;
}

/// An in-process remote store for tests and embedding.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use syncset_core::{now_millis, total_size};

    use crate::error::SyncError;

    /// Open session tokens kept per dataset; older ones are evicted.
    pub const MAX_OPEN_SESSIONS: usize = 8;

    /// Configuration for [`MemoryRemote`].
    #[derive(Debug, Clone)]
    pub struct MemoryRemoteConfig {
        /// Records returned per page of a listing.
        pub page_size: usize,
        /// Live records a dataset may hold before writes fail.
        pub max_records_per_dataset: Option<usize>,
        /// Written into `last_modified_by` of accepted records.
        pub device_id: String,
    }

    impl Default for MemoryRemoteConfig {
        fn default() -> Self {
            Self {
                page_size: 1024,
                max_records_per_dataset: None,
                device_id: "memory-remote".into(),
            }
        }
    }

    /// Remote operations, for call logs and fault injection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum RemoteOp {
        ListDatasets,
        ListUpdates,
        PutRecords,
        DeleteDataset,
        GetDatasetMetadata,
    }

    /// A failure to return from the next call of an operation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RemoteFailure {
        NotFound,
        Conflict,
        LimitExceeded,
        Network,
        Storage,
    }

    impl RemoteFailure {
        fn into_error(self, dataset: &str) -> SyncError {
            let msg = format!("injected failure for {dataset}");
            match self {
                RemoteFailure::NotFound => SyncError::DatasetNotFound(msg),
                RemoteFailure::Conflict => SyncError::DataConflict(msg),
                RemoteFailure::LimitExceeded => SyncError::LimitExceeded(msg),
                RemoteFailure::Network => SyncError::Network(msg),
                RemoteFailure::Storage => SyncError::RemoteStorage(msg),
            }
        }
    }

    /// One logged call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RemoteCall {
        pub op: RemoteOp,
        pub dataset: String,
    }

    #[derive(Debug, Clone, Default)]
    struct RemoteDataset {
        records: BTreeMap<String, Record>,
        sync_count: i64,
        creation_date: i64,
        last_modified_date: i64,
        last_modified_by: Option<String>,
        deleted: bool,
        /// Sync count at the most recent deletion. Survives recreation so
        /// clients that saw the old contents still learn of the deletion.
        deleted_at: Option<i64>,
        merged_dataset_names: Vec<String>,
    }

    impl RemoteDataset {
        fn new(now: i64) -> Self {
            Self {
                creation_date: now,
                last_modified_date: now,
                ..Default::default()
            }
        }

        fn mark_deleted(&mut self) {
            self.deleted = true;
            self.deleted_at = Some(self.sync_count);
            self.records.clear();
            self.merged_dataset_names.clear();
        }

        /// Sync counts keep counting from where the deleted dataset stopped.
        fn recreate(&mut self, now: i64) {
            self.deleted = false;
            self.creation_date = now;
        }

        /// Whether a client at `last_sync_count` holds contents removed by
        /// the last deletion.
        fn deleted_since(&self, last_sync_count: i64) -> bool {
            self.deleted_at
                .is_some_and(|at| 0 < last_sync_count && last_sync_count <= at)
        }

        fn metadata(&self, name: &str) -> DatasetMetadata {
            let live: Vec<&Record> = self.records.values().filter(|r| !r.is_deleted()).collect();
            DatasetMetadata {
                dataset_name: name.to_string(),
                creation_date: Some(self.creation_date),
                last_modified_date: Some(self.last_modified_date),
                last_modified_by: self.last_modified_by.clone(),
                storage_size_bytes: total_size(live.iter().copied()) as i64,
                record_count: live.len() as i64,
                last_sync_count: self.sync_count,
                last_sync_date: None,
            }
        }

        /// Commit one batch of changes under the next sync count.
        fn commit(&mut self, records: &[Record], by: &str, now: i64) -> Vec<Record> {
            self.sync_count += 1;
            self.last_modified_date = now;
            self.last_modified_by = Some(by.to_string());
            records
                .iter()
                .map(|patch| {
                    let record = Record {
                        key: patch.key.clone(),
                        value: patch.value.clone(),
                        sync_count: self.sync_count,
                        last_modified_date: Some(now),
                        last_modified_by: Some(by.to_string()),
                        device_last_modified_date: patch.device_last_modified_date,
                        is_modified: false,
                    };
                    self.records.insert(record.key.clone(), record.clone());
                    record
                })
                .collect()
        }
    }

    #[derive(Default)]
    struct Inner {
        config: MemoryRemoteConfig,
        datasets: BTreeMap<String, RemoteDataset>,
        /// Dataset -> open session tokens, oldest first.
        sessions: HashMap<String, VecDeque<String>>,
        failures: HashMap<RemoteOp, VecDeque<RemoteFailure>>,
        calls: Vec<RemoteCall>,
        pages_served: usize,
    }

    /// In-memory remote store. Clones share state.
    #[derive(Clone, Default)]
    pub struct MemoryRemote {
        inner: Arc<Mutex<Inner>>,
    }

    struct Page {
        records: Vec<Record>,
        next: Option<usize>,
    }

    impl MemoryRemote {
        pub fn new() -> Self {
            Self::with_config(MemoryRemoteConfig::default())
        }

        pub fn with_config(config: MemoryRemoteConfig) -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    config,
                    ..Default::default()
                })),
            }
        }

        fn lock(&self) -> MutexGuard<'_, Inner> {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Log the call and return an injected failure, if one is queued.
        fn begin(inner: &mut Inner, op: RemoteOp, dataset: &str) -> Result<()> {
            inner.calls.push(RemoteCall {
                op,
                dataset: dataset.to_string(),
            });
            match inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
                Some(failure) => {
                    tracing::debug!(?op, dataset, ?failure, "injecting remote failure");
                    Err(failure.into_error(dataset))
                }
                None => Ok(()),
            }
        }

        fn open_session(inner: &mut Inner, dataset_name: &str) -> String {
            let token = hex::encode(rand::random::<[u8; 16]>());
            let open = inner.sessions.entry(dataset_name.to_string()).or_default();
            if open.len() == MAX_OPEN_SESSIONS {
                open.pop_front();
            }
            open.push_back(token.clone());
            token
        }

        /// Consume a session token issued for `dataset_name`.
        fn close_session(inner: &mut Inner, dataset_name: &str, token: &str) -> bool {
            let Some(open) = inner.sessions.get_mut(dataset_name) else {
                return false;
            };
            let Some(at) = open.iter().position(|t| t == token) else {
                return false;
            };
            open.remove(at);
            if open.is_empty() {
                inner.sessions.remove(dataset_name);
            }
            true
        }

        fn page(&self, dataset_name: &str, last_sync_count: i64, offset: usize) -> Page {
            let mut inner = self.lock();
            inner.pages_served += 1;
            let page_size = inner.config.page_size.max(1);
            let Some(dataset) = inner.datasets.get(dataset_name) else {
                return Page {
                    records: Vec::new(),
                    next: None,
                };
            };
            let mut changed: Vec<&Record> = dataset
                .records
                .values()
                .filter(|r| r.sync_count > last_sync_count)
                .collect();
            changed.sort_by(|a, b| (a.sync_count, &a.key).cmp(&(b.sync_count, &b.key)));
            let records: Vec<Record> = changed
                .iter()
                .skip(offset)
                .take(page_size)
                .map(|r| (*r).clone())
                .collect();
            let end = offset + records.len();
            Page {
                next: (end < changed.len()).then_some(end),
                records,
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // Test hooks
        // ─────────────────────────────────────────────────────────────────────

        /// Queue a failure for the next call of `op`.
        pub fn fail_next(&self, op: RemoteOp, failure: RemoteFailure) {
            self.lock().failures.entry(op).or_default().push_back(failure);
        }

        /// Write as another device would, bypassing session and conflict
        /// checks. Returns the dataset's new sync count.
        pub fn write_from_other_device(
            &self,
            dataset_name: &str,
            key: &str,
            value: Option<&str>,
        ) -> i64 {
            self.write_batch_from_other_device(dataset_name, &[(key, value)])
        }

        /// Several keys committed under one sync count.
        pub fn write_batch_from_other_device(
            &self,
            dataset_name: &str,
            changes: &[(&str, Option<&str>)],
        ) -> i64 {
            let now = now_millis();
            let mut inner = self.lock();
            let dataset = inner
                .datasets
                .entry(dataset_name.to_string())
                .or_insert_with(|| RemoteDataset::new(now));
            if dataset.deleted {
                dataset.recreate(now);
            }
            let patches: Vec<Record> = changes
                .iter()
                .map(|(k, v)| Record::remote(*k, v.map(str::to_string), 0, now))
                .collect();
            dataset.commit(&patches, "other-device", now);
            dataset.sync_count
        }

        /// Make later pulls report these merged dataset names.
        pub fn set_merged_datasets(&self, dataset_name: &str, names: Vec<String>) {
            let now = now_millis();
            let mut inner = self.lock();
            inner
                .datasets
                .entry(dataset_name.to_string())
                .or_insert_with(|| RemoteDataset::new(now))
                .merged_dataset_names = names;
        }

        /// Delete as another device would.
        pub fn delete_from_other_device(&self, dataset_name: &str) {
            if let Some(dataset) = self.lock().datasets.get_mut(dataset_name) {
                dataset.mark_deleted();
            }
        }

        pub fn record(&self, dataset_name: &str, key: &str) -> Option<Record> {
            self.lock()
                .datasets
                .get(dataset_name)
                .and_then(|d| d.records.get(key).cloned())
        }

        /// Current sync count, `None` for unknown or deleted datasets.
        pub fn sync_count(&self, dataset_name: &str) -> Option<i64> {
            self.lock()
                .datasets
                .get(dataset_name)
                .filter(|d| !d.deleted)
                .map(|d| d.sync_count)
        }

        pub fn calls(&self) -> Vec<RemoteCall> {
            self.lock().calls.clone()
        }

        pub fn count_calls(&self, op: RemoteOp) -> usize {
            self.lock().calls.iter().filter(|c| c.op == op).count()
        }

        pub fn pages_served(&self) -> usize {
            self.lock().pages_served
        }

        /// Session tokens issued for a dataset and not yet used by a push.
        pub fn open_sessions(&self, dataset_name: &str) -> usize {
            self.lock().sessions.get(dataset_name).map_or(0, VecDeque::len)
        }
    }

    #[async_trait]
    impl RemoteStorage for MemoryRemote {
        async fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
            let mut inner = self.lock();
            Self::begin(&mut inner, RemoteOp::ListDatasets, "")?;
            Ok(inner
                .datasets
                .iter()
                .filter(|(_, d)| !d.deleted)
                .map(|(name, d)| d.metadata(name))
                .collect())
        }

        async fn list_updates(
            &self,
            dataset_name: &str,
            last_sync_count: i64,
        ) -> Result<DatasetUpdates> {
            let (mut updates, token) = {
                let mut inner = self.lock();
                Self::begin(&mut inner, RemoteOp::ListUpdates, dataset_name)?;
                let token = Self::open_session(&mut inner, dataset_name);
                let updates = match inner.datasets.get(dataset_name) {
                    None => DatasetUpdates {
                        dataset_name: dataset_name.to_string(),
                        ..Default::default()
                    },
                    // A client that never saw the old contents sees no dataset
                    // at all, so its push recreates it.
                    Some(d) if d.deleted => DatasetUpdates {
                        dataset_name: dataset_name.to_string(),
                        deleted: d.deleted_since(last_sync_count),
                        ..Default::default()
                    },
                    Some(d) => DatasetUpdates {
                        dataset_name: dataset_name.to_string(),
                        records: Vec::new(),
                        sync_count: d.sync_count,
                        sync_session_token: String::new(),
                        exists: true,
                        deleted: d.deleted_since(last_sync_count),
                        merged_dataset_names: d.merged_dataset_names.clone(),
                    },
                };
                (updates, token)
            };
            updates.sync_session_token = token;

            if updates.exists {
                let mut offset = 0;
                loop {
                    let page = self.page(dataset_name, last_sync_count, offset);
                    updates.records.extend(page.records);
                    match page.next {
                        Some(next) => offset = next,
                        None => break,
                    }
                }
            }
            Ok(updates)
        }

        async fn put_records(
            &self,
            dataset_name: &str,
            records: &[Record],
            sync_session_token: &str,
        ) -> Result<Vec<Record>> {
            let now = now_millis();
            let mut inner = self.lock();
            Self::begin(&mut inner, RemoteOp::PutRecords, dataset_name)?;

            if !inner
                .sessions
                .get(dataset_name)
                .is_some_and(|open| open.iter().any(|t| t == sync_session_token))
            {
                return Err(SyncError::RemoteStorage(format!(
                    "invalid sync session token for {dataset_name}"
                )));
            }

            let max_records = inner.config.max_records_per_dataset;
            let device_id = inner.config.device_id.clone();
            let dataset = inner
                .datasets
                .entry(dataset_name.to_string())
                .or_insert_with(|| RemoteDataset::new(now));
            if dataset.deleted {
                dataset.recreate(now);
            }

            for patch in records {
                let current = dataset.records.get(&patch.key).map_or(0, |r| r.sync_count);
                if patch.sync_count != current {
                    return Err(SyncError::DataConflict(format!(
                        "record {} is at sync count {current}, patch targets {}",
                        patch.key, patch.sync_count
                    )));
                }
            }

            if let Some(max) = max_records {
                let mut live: BTreeMap<&str, bool> = dataset
                    .records
                    .values()
                    .map(|r| (r.key.as_str(), !r.is_deleted()))
                    .collect();
                for patch in records {
                    live.insert(patch.key.as_str(), !patch.is_deleted());
                }
                let count = live.values().filter(|l| **l).count();
                if count > max {
                    return Err(SyncError::LimitExceeded(format!(
                        "{dataset_name} would hold {count} records, limit is {max}"
                    )));
                }
            }

            let committed = dataset.commit(records, &device_id, now);
            Self::close_session(&mut inner, dataset_name, sync_session_token);
            Ok(committed)
        }

        async fn delete_dataset(&self, dataset_name: &str) -> Result<()> {
            let mut inner = self.lock();
            Self::begin(&mut inner, RemoteOp::DeleteDataset, dataset_name)?;
            match inner.datasets.get_mut(dataset_name) {
                Some(dataset) if !dataset.deleted => {
                    dataset.mark_deleted();
                    Ok(())
                }
                _ => Err(SyncError::DatasetNotFound(dataset_name.to_string())),
            }
        }

        async fn get_dataset_metadata(&self, dataset_name: &str) -> Result<DatasetMetadata> {
            let mut inner = self.lock();
            Self::begin(&mut inner, RemoteOp::GetDatasetMetadata, dataset_name)?;
            inner
                .datasets
                .get(dataset_name)
                .filter(|d| !d.deleted)
                .map(|d| d.metadata(dataset_name))
                .ok_or_else(|| SyncError::DatasetNotFound(dataset_name.to_string()))
        }
    }
}
