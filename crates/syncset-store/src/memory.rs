//! In-memory implementation of the LocalStorage trait.
//!
//! Same semantics as SQLite with no persistence. Instances are independent:
//! share one between handles by wrapping it in an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use syncset_core::{now_millis, DatasetMetadata, Record, DELETED_SYNC_COUNT};

use crate::error::{Result, StoreError};
use crate::traits::{merged_dataset_name, LocalStorage};

type DatasetKey = (String, String);

/// In-memory local storage. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<HashMap<DatasetKey, StoredDataset>>,
}

#[derive(Clone)]
struct StoredDataset {
    metadata: DatasetMetadata,
    /// `None` once the dataset has been deleted locally.
    records: Option<BTreeMap<String, Record>>,
}

fn key(identity_id: &str, dataset_name: &str) -> DatasetKey {
    (identity_id.to_string(), dataset_name.to_string())
}

impl MemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<DatasetKey, StoredDataset>>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<DatasetKey, StoredDataset>>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    /// Run `f` against the live records of a dataset, failing if the dataset
    /// is absent or deleted.
    fn with_records_mut<T>(
        &self,
        identity_id: &str,
        dataset_name: &str,
        f: impl FnOnce(&mut BTreeMap<String, Record>, &mut DatasetMetadata) -> T,
    ) -> Result<T> {
        let mut inner = self.write()?;
        let dataset = inner
            .get_mut(&key(identity_id, dataset_name))
            .ok_or_else(|| StoreError::dataset_not_found(identity_id, dataset_name))?;
        let StoredDataset { metadata, records } = dataset;
        let records = records
            .as_mut()
            .ok_or_else(|| StoreError::dataset_not_found(identity_id, dataset_name))?;
        Ok(f(records, metadata))
    }

    fn read_records<T>(
        &self,
        identity_id: &str,
        dataset_name: &str,
        f: impl FnOnce(&BTreeMap<String, Record>) -> T,
        default: T,
    ) -> Result<T> {
        let inner = self.read()?;
        Ok(
            match inner
                .get(&key(identity_id, dataset_name))
                .and_then(|d| d.records.as_ref())
            {
                Some(records) => f(records),
                None => default,
            },
        )
    }
}

fn put_value_into(records: &mut BTreeMap<String, Record>, key: &str, value: Option<&str>, now: i64) -> bool {
    let value = value.map(str::to_string);
    match records.get_mut(key) {
        Some(record) => record.apply_local_change(value, now),
        None => {
            records.insert(key.to_string(), Record::local(key, value, now));
            true
        }
    }
}

#[async_trait]
impl LocalStorage for MemoryStorage {
    async fn create_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .entry(key(identity_id, dataset_name))
            .or_insert_with(|| StoredDataset {
                metadata: DatasetMetadata::new(dataset_name, now_millis()),
                records: Some(BTreeMap::new()),
            });
        Ok(())
    }

    async fn get_dataset_metadata_list(&self, identity_id: &str) -> Result<Vec<DatasetMetadata>> {
        let inner = self.read()?;
        let mut list: Vec<DatasetMetadata> = inner
            .iter()
            .filter(|((id, _), _)| id == identity_id)
            .map(|(_, d)| d.metadata.clone())
            .collect();
        list.sort_by(|a, b| a.dataset_name.cmp(&b.dataset_name));
        Ok(list)
    }

    async fn get_dataset_metadata(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Option<DatasetMetadata>> {
        let inner = self.read()?;
        Ok(inner
            .get(&key(identity_id, dataset_name))
            .map(|d| d.metadata.clone()))
    }

    async fn update_dataset_metadata(
        &self,
        identity_id: &str,
        metadata: &[DatasetMetadata],
    ) -> Result<()> {
        let mut inner = self.write()?;
        for remote in metadata {
            let dataset = inner
                .entry(key(identity_id, &remote.dataset_name))
                .or_insert_with(|| StoredDataset {
                    metadata: DatasetMetadata::new(remote.dataset_name.as_str(), now_millis()),
                    records: Some(BTreeMap::new()),
                });
            let local = &mut dataset.metadata;
            local.creation_date = remote.creation_date.or(local.creation_date);
            local.last_modified_date = remote.last_modified_date.or(local.last_modified_date);
            local.last_modified_by = remote.last_modified_by.clone();
            local.storage_size_bytes = remote.storage_size_bytes;
            local.record_count = remote.record_count;
        }
        Ok(())
    }

    async fn delete_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(dataset) = inner.get_mut(&key(identity_id, dataset_name)) {
            let now = now_millis();
            dataset.records = None;
            dataset.metadata.last_sync_count = DELETED_SYNC_COUNT;
            dataset.metadata.last_modified_date = Some(now);
            dataset.metadata.record_count = 0;
            dataset.metadata.storage_size_bytes = 0;
        }
        Ok(())
    }

    async fn purge_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        self.write()?.remove(&key(identity_id, dataset_name));
        Ok(())
    }

    async fn get_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        self.read_records(
            identity_id,
            dataset_name,
            |records| records.get(key).and_then(|r| r.value.clone()),
            None,
        )
    }

    async fn put_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let now = now_millis();
        self.with_records_mut(identity_id, dataset_name, |records, metadata| {
            if put_value_into(records, key, value, now) {
                metadata.last_modified_date = Some(now);
            }
        })
    }

    async fn get_value_map(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<BTreeMap<String, String>> {
        self.read_records(
            identity_id,
            dataset_name,
            |records| {
                records
                    .values()
                    .filter_map(|r| r.value.clone().map(|v| (r.key.clone(), v)))
                    .collect()
            },
            BTreeMap::new(),
        )
    }

    async fn put_all_values(
        &self,
        identity_id: &str,
        dataset_name: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<()> {
        let now = now_millis();
        self.with_records_mut(identity_id, dataset_name, |records, metadata| {
            let mut changed = false;
            for (key, value) in values {
                changed |= put_value_into(records, key, Some(value), now);
            }
            if changed {
                metadata.last_modified_date = Some(now);
            }
        })
    }

    async fn get_record(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<Record>> {
        self.read_records(
            identity_id,
            dataset_name,
            |records| records.get(key).cloned(),
            None,
        )
    }

    async fn get_records(&self, identity_id: &str, dataset_name: &str) -> Result<Vec<Record>> {
        self.read_records(
            identity_id,
            dataset_name,
            |records| records.values().cloned().collect(),
            Vec::new(),
        )
    }

    async fn get_modified_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Vec<Record>> {
        self.read_records(
            identity_id,
            dataset_name,
            |records| records.values().filter(|r| r.is_modified).cloned().collect(),
            Vec::new(),
        )
    }

    async fn put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
    ) -> Result<()> {
        let now = now_millis();
        self.with_records_mut(identity_id, dataset_name, |stored, metadata| {
            for record in records {
                stored.insert(record.key.clone(), record.clone());
            }
            metadata.last_modified_date = Some(now);
        })
    }

    async fn get_last_sync_count(&self, identity_id: &str, dataset_name: &str) -> Result<i64> {
        let inner = self.read()?;
        Ok(inner
            .get(&key(identity_id, dataset_name))
            .map_or(0, |d| d.metadata.last_sync_count))
    }

    async fn update_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let dataset = inner
            .get_mut(&key(identity_id, dataset_name))
            .ok_or_else(|| StoreError::dataset_not_found(identity_id, dataset_name))?;
        dataset.metadata.last_sync_count = last_sync_count;
        dataset.metadata.last_sync_date = Some(now_millis());
        Ok(())
    }

    async fn change_identity_id(
        &self,
        old_identity_id: &str,
        new_identity_id: &str,
    ) -> Result<()> {
        if old_identity_id == new_identity_id {
            return Ok(());
        }
        let mut inner = self.write()?;
        let mut moving: Vec<DatasetKey> = inner
            .keys()
            .filter(|(id, _)| id == old_identity_id)
            .cloned()
            .collect();
        moving.sort();
        for old_key in moving {
            let Some(mut dataset) = inner.remove(&old_key) else {
                continue;
            };
            let mut name = old_key.1;
            if inner.contains_key(&key(new_identity_id, &name)) {
                name = merged_dataset_name(&name, old_identity_id, |candidate| {
                    Ok::<_, StoreError>(inner.contains_key(&key(new_identity_id, candidate)))
                })?;
                dataset.metadata.dataset_name = name.clone();
            }
            inner.insert((new_identity_id.to_string(), name), dataset);
        }
        Ok(())
    }

    async fn wipe_data(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "identity-1";

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let a = MemoryStorage::new();
        let b = MemoryStorage::new();
        a.create_dataset(ID, "ds").await.unwrap();
        a.put_value(ID, "ds", "k", Some("v")).await.unwrap();

        assert_eq!(a.get_value(ID, "ds", "k").await.unwrap().as_deref(), Some("v"));
        assert!(b.get_value(ID, "ds", "k").await.unwrap().is_none());
        assert!(b.get_dataset_metadata(ID, "ds").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_dataset_is_idempotent() {
        let storage = MemoryStorage::new();
        storage.create_dataset(ID, "ds").await.unwrap();
        storage.put_value(ID, "ds", "k", Some("v")).await.unwrap();
        storage.create_dataset(ID, "ds").await.unwrap();
        assert_eq!(storage.get_records(ID, "ds").await.unwrap().len(), 1);
    }
}
