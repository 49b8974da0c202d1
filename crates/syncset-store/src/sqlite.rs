//! SQLite implementation of the LocalStorage trait.
//!
//! The persistent backend. Uses rusqlite with bundled SQLite, wrapped in
//! async via tokio::spawn_blocking.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use syncset_core::{now_millis, DatasetMetadata, Record, DELETED_SYNC_COUNT};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{merged_dataset_name, LocalStorage};

/// SQLite-based local storage.
///
/// Thread-safe via internal Mutex. All operations run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

const RECORD_COLUMNS: &str = "key, value, sync_count, last_modified_timestamp, last_modified_by, \
     device_last_modified_timestamp, modified";

const DATASET_COLUMNS: &str = "dataset_name, creation_timestamp, last_modified_timestamp, \
     last_modified_by, storage_size_bytes, record_count, last_sync_count, last_sync_timestamp";

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        key: row.get("key")?,
        value: row.get("value")?,
        sync_count: row.get("sync_count")?,
        last_modified_date: row.get("last_modified_timestamp")?,
        last_modified_by: row.get("last_modified_by")?,
        device_last_modified_date: row.get("device_last_modified_timestamp")?,
        is_modified: row.get::<_, i64>("modified")? != 0,
    })
}

fn row_to_metadata(row: &Row<'_>) -> rusqlite::Result<DatasetMetadata> {
    Ok(DatasetMetadata {
        dataset_name: row.get("dataset_name")?,
        creation_date: row.get("creation_timestamp")?,
        last_modified_date: row.get("last_modified_timestamp")?,
        last_modified_by: row.get("last_modified_by")?,
        storage_size_bytes: row.get("storage_size_bytes")?,
        record_count: row.get("record_count")?,
        last_sync_count: row.get("last_sync_count")?,
        last_sync_date: row.get("last_sync_timestamp")?,
    })
}

/// Fail unless the dataset exists and has not been deleted locally.
fn require_live(conn: &Connection, identity_id: &str, dataset_name: &str) -> Result<()> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT last_sync_count FROM datasets WHERE identity_id = ?1 AND dataset_name = ?2",
            params![identity_id, dataset_name],
            |row| row.get(0),
        )
        .optional()?;
    match count {
        Some(c) if c != DELETED_SYNC_COUNT => Ok(()),
        _ => Err(StoreError::dataset_not_found(identity_id, dataset_name)),
    }
}

fn touch_dataset(conn: &Connection, identity_id: &str, dataset_name: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE datasets SET last_modified_timestamp = ?3
         WHERE identity_id = ?1 AND dataset_name = ?2",
        params![identity_id, dataset_name, now],
    )?;
    Ok(())
}

fn select_record(
    conn: &Connection,
    identity_id: &str,
    dataset_name: &str,
    key: &str,
) -> Result<Option<Record>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM records
         WHERE identity_id = ?1 AND dataset_name = ?2 AND key = ?3"
    );
    Ok(conn
        .query_row(&sql, params![identity_id, dataset_name, key], row_to_record)
        .optional()?)
}

fn upsert_record(conn: &Connection, identity_id: &str, dataset_name: &str, record: &Record) -> Result<()> {
    conn.execute(
        "INSERT INTO records (
            identity_id, dataset_name, key, value, sync_count, last_modified_timestamp,
            last_modified_by, device_last_modified_timestamp, modified
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(identity_id, dataset_name, key) DO UPDATE SET
            value = excluded.value,
            sync_count = excluded.sync_count,
            last_modified_timestamp = excluded.last_modified_timestamp,
            last_modified_by = excluded.last_modified_by,
            device_last_modified_timestamp = excluded.device_last_modified_timestamp,
            modified = excluded.modified",
        params![
            identity_id,
            dataset_name,
            record.key,
            record.value,
            record.sync_count,
            record.last_modified_date,
            record.last_modified_by,
            record.device_last_modified_date,
            record.is_modified as i64,
        ],
    )?;
    Ok(())
}

/// Local write of one value. Returns whether anything changed.
fn write_value(
    conn: &Connection,
    identity_id: &str,
    dataset_name: &str,
    key: &str,
    value: Option<&str>,
    now: i64,
) -> Result<bool> {
    let value = value.map(str::to_string);
    let record = match select_record(conn, identity_id, dataset_name, key)? {
        Some(mut record) => {
            if !record.apply_local_change(value, now) {
                return Ok(false);
            }
            record
        }
        None => Record::local(key, value, now),
    };
    upsert_record(conn, identity_id, dataset_name, &record)?;
    Ok(true)
}

fn query_records(conn: &Connection, sql: &str, identity_id: &str, dataset_name: &str) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(params![identity_id, dataset_name], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

#[async_trait]
impl LocalStorage for SqliteStorage {
    async fn create_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        self.run(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT OR IGNORE INTO datasets (
                    identity_id, dataset_name, creation_timestamp, last_modified_timestamp
                ) VALUES (?1, ?2, ?3, ?3)",
                params![identity_id, dataset_name, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_dataset_metadata_list(&self, identity_id: &str) -> Result<Vec<DatasetMetadata>> {
        let identity_id = identity_id.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {DATASET_COLUMNS} FROM datasets WHERE identity_id = ?1
                 ORDER BY dataset_name"
            );
            let mut stmt = conn.prepare(&sql)?;
            let list = stmt
                .query_map(params![identity_id], row_to_metadata)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(list)
        })
        .await
    }

    async fn get_dataset_metadata(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Option<DatasetMetadata>> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        self.run(move |conn| {
            let sql = format!(
                "SELECT {DATASET_COLUMNS} FROM datasets
                 WHERE identity_id = ?1 AND dataset_name = ?2"
            );
            Ok(conn
                .query_row(&sql, params![identity_id, dataset_name], row_to_metadata)
                .optional()?)
        })
        .await
    }

    async fn update_dataset_metadata(
        &self,
        identity_id: &str,
        metadata: &[DatasetMetadata],
    ) -> Result<()> {
        let identity_id = identity_id.to_string();
        let metadata = metadata.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let now = now_millis();
            for m in &metadata {
                tx.execute(
                    "INSERT INTO datasets (
                        identity_id, dataset_name, creation_timestamp, last_modified_timestamp,
                        last_modified_by, storage_size_bytes, record_count
                    ) VALUES (?1, ?2, COALESCE(?3, ?8), COALESCE(?4, ?8), ?5, ?6, ?7)
                    ON CONFLICT(identity_id, dataset_name) DO UPDATE SET
                        creation_timestamp = COALESCE(?3, creation_timestamp),
                        last_modified_timestamp = COALESCE(?4, last_modified_timestamp),
                        last_modified_by = excluded.last_modified_by,
                        storage_size_bytes = excluded.storage_size_bytes,
                        record_count = excluded.record_count",
                    params![
                        identity_id,
                        m.dataset_name,
                        m.creation_date,
                        m.last_modified_date,
                        m.last_modified_by,
                        m.storage_size_bytes,
                        m.record_count,
                        now,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM records WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name],
            )?;
            tx.execute(
                "UPDATE datasets SET last_sync_count = ?3, last_modified_timestamp = ?4,
                    record_count = 0, storage_size_bytes = 0
                 WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name, DELETED_SYNC_COUNT, now_millis()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn purge_dataset(&self, identity_id: &str, dataset_name: &str) -> Result<()> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM records WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name],
            )?;
            tx.execute(
                "DELETE FROM datasets WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let record = self.get_record(identity_id, dataset_name, key).await?;
        Ok(record.and_then(|r| r.value))
    }

    async fn put_value(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        let key = key.to_string();
        let value = value.map(str::to_string);
        self.run(move |conn| {
            let tx = conn.transaction()?;
            require_live(&tx, &identity_id, &dataset_name)?;
            let now = now_millis();
            if write_value(&tx, &identity_id, &dataset_name, &key, value.as_deref(), now)? {
                touch_dataset(&tx, &identity_id, &dataset_name, now)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_value_map(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<BTreeMap<String, String>> {
        let records = self.get_records(identity_id, dataset_name).await?;
        Ok(records
            .into_iter()
            .filter_map(|r| r.value.map(|v| (r.key, v)))
            .collect())
    }

    async fn put_all_values(
        &self,
        identity_id: &str,
        dataset_name: &str,
        values: &BTreeMap<String, String>,
    ) -> Result<()> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        let values = values.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            require_live(&tx, &identity_id, &dataset_name)?;
            let now = now_millis();
            let mut changed = false;
            for (key, value) in &values {
                changed |= write_value(&tx, &identity_id, &dataset_name, key, Some(value), now)?;
            }
            if changed {
                touch_dataset(&tx, &identity_id, &dataset_name, now)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_record(
        &self,
        identity_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<Option<Record>> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        let key = key.to_string();
        self.run(move |conn| select_record(conn, &identity_id, &dataset_name, &key))
            .await
    }

    async fn get_records(&self, identity_id: &str, dataset_name: &str) -> Result<Vec<Record>> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        self.run(move |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE identity_id = ?1 AND dataset_name = ?2 ORDER BY key"
            );
            query_records(conn, &sql, &identity_id, &dataset_name)
        })
        .await
    }

    async fn get_modified_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
    ) -> Result<Vec<Record>> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        self.run(move |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM records
                 WHERE identity_id = ?1 AND dataset_name = ?2 AND modified = 1 ORDER BY key"
            );
            query_records(conn, &sql, &identity_id, &dataset_name)
        })
        .await
    }

    async fn put_records(
        &self,
        identity_id: &str,
        dataset_name: &str,
        records: &[Record],
    ) -> Result<()> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        let records = records.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            require_live(&tx, &identity_id, &dataset_name)?;
            for record in &records {
                upsert_record(&tx, &identity_id, &dataset_name, record)?;
            }
            touch_dataset(&tx, &identity_id, &dataset_name, now_millis())?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_last_sync_count(&self, identity_id: &str, dataset_name: &str) -> Result<i64> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        self.run(move |conn| {
            let count: Option<i64> = conn
                .query_row(
                    "SELECT last_sync_count FROM datasets
                     WHERE identity_id = ?1 AND dataset_name = ?2",
                    params![identity_id, dataset_name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count.unwrap_or(0))
        })
        .await
    }

    async fn update_last_sync_count(
        &self,
        identity_id: &str,
        dataset_name: &str,
        last_sync_count: i64,
    ) -> Result<()> {
        let (identity_id, dataset_name) = (identity_id.to_string(), dataset_name.to_string());
        self.run(move |conn| {
            let updated = conn.execute(
                "UPDATE datasets SET last_sync_count = ?3, last_sync_timestamp = ?4
                 WHERE identity_id = ?1 AND dataset_name = ?2",
                params![identity_id, dataset_name, last_sync_count, now_millis()],
            )?;
            if updated == 0 {
                return Err(StoreError::dataset_not_found(&identity_id, &dataset_name));
            }
            Ok(())
        })
        .await
    }

    async fn change_identity_id(
        &self,
        old_identity_id: &str,
        new_identity_id: &str,
    ) -> Result<()> {
        if old_identity_id == new_identity_id {
            return Ok(());
        }
        let (old_id, new_id) = (old_identity_id.to_string(), new_identity_id.to_string());
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let names: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT dataset_name FROM datasets WHERE identity_id = ?1
                     ORDER BY dataset_name",
                )?;
                let names = stmt
                    .query_map(params![old_id], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                names
            };
            let taken = |candidate: &str| -> rusqlite::Result<bool> {
                tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM datasets
                     WHERE identity_id = ?1 AND dataset_name = ?2)",
                    params![new_id, candidate],
                    |row| row.get(0),
                )
            };
            for name in names {
                let target = if taken(name.as_str())? {
                    merged_dataset_name(&name, &old_id, &taken)?
                } else {
                    name.clone()
                };
                for table in ["datasets", "records"] {
                    tx.execute(
                        &format!(
                            "UPDATE {table} SET identity_id = ?1, dataset_name = ?2
                             WHERE identity_id = ?3 AND dataset_name = ?4"
                        ),
                        params![new_id, target, old_id, name],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn wipe_data(&self) -> Result<()> {
        self.run(|conn| {
            conn.execute_batch("DELETE FROM records; DELETE FROM datasets;")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "identity-1";

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.db");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.create_dataset(ID, "ds").await.unwrap();
            storage.put_value(ID, "ds", "k", Some("v")).await.unwrap();
            storage.update_last_sync_count(ID, "ds", 4).await.unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        let record = storage.get_record(ID, "ds", "k").await.unwrap().unwrap();
        assert_eq!(record.value.as_deref(), Some("v"));
        assert!(record.is_modified);
        assert_eq!(storage.get_last_sync_count(ID, "ds").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_tombstone_round_trips_as_null() {
        let storage = SqliteStorage::open_memory().unwrap();
        storage.create_dataset(ID, "ds").await.unwrap();
        storage.put_value(ID, "ds", "k", Some("v")).await.unwrap();
        storage.put_value(ID, "ds", "k", None).await.unwrap();

        let record = storage.get_record(ID, "ds", "k").await.unwrap().unwrap();
        assert!(record.is_deleted());
        assert!(storage.get_value_map(ID, "ds").await.unwrap().is_empty());
    }
}
