//! The caller-facing dataset handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use syncset_core::{
    record_size, total_size, validate_dataset_name, validate_record_key, DatasetMetadata, Record,
};
use syncset_store::LocalStorage;

use crate::cancel::CancelToken;
use crate::engine::{
    find_merged_remnants, GateGuard, SyncConfig, SyncGate, SyncOutcome, SyncPass, SyncReport,
};
use crate::error::{Result, SyncError};
use crate::events::CallbackRegistry;
use crate::identity::IdentityProvider;
use crate::remote::RemoteStorage;

/// A named key/value dataset of the current identity.
///
/// Reads and writes go straight to local storage; [`synchronize`](Self::synchronize)
/// reconciles with the remote. Clones share callbacks and sync state.
#[derive(Clone)]
pub struct Dataset {
    inner: Arc<DatasetInner>,
}

struct DatasetInner {
    name: String,
    local: Arc<dyn LocalStorage>,
    remote: Arc<dyn RemoteStorage>,
    identity: Arc<dyn IdentityProvider>,
    config: SyncConfig,
    callbacks: CallbackRegistry,
    gate: SyncGate,
}

impl Dataset {
    /// Open a dataset, creating its local metadata if needed.
    pub async fn open(
        name: impl Into<String>,
        local: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> Result<Self> {
        let name = name.into();
        validate_dataset_name(&name)?;
        local.create_dataset(&identity.identity_id(), &name).await?;
        Ok(Self {
            inner: Arc::new(DatasetInner {
                name,
                local,
                remote,
                identity,
                config,
                callbacks: CallbackRegistry::new(),
                gate: SyncGate::default(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn identity_id(&self) -> String {
        self.inner.identity.identity_id()
    }

    /// Event handlers of this dataset.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.inner.callbacks
    }

    pub fn clear_all_callbacks(&self) {
        self.inner.callbacks.clear();
    }

    pub async fn metadata(&self) -> Result<Option<DatasetMetadata>> {
        Ok(self
            .inner
            .local
            .get_dataset_metadata(&self.identity_id(), self.name())
            .await?)
    }

    pub async fn last_sync_count(&self) -> Result<i64> {
        Ok(self
            .inner
            .local
            .get_last_sync_count(&self.identity_id(), self.name())
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Values
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        validate_record_key(key)?;
        Ok(self
            .inner
            .local
            .get_value(&self.identity_id(), self.name(), key)
            .await?)
    }

    pub async fn get_record(&self, key: &str) -> Result<Option<Record>> {
        validate_record_key(key)?;
        Ok(self
            .inner
            .local
            .get_record(&self.identity_id(), self.name(), key)
            .await?)
    }

    /// Live values; tombstones are left out.
    pub async fn get_all(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .inner
            .local
            .get_value_map(&self.identity_id(), self.name())
            .await?)
    }

    /// Every record including tombstones.
    pub async fn get_all_records(&self) -> Result<Vec<Record>> {
        Ok(self
            .inner
            .local
            .get_records(&self.identity_id(), self.name())
            .await?)
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_record_key(key)?;
        self.inner
            .local
            .put_value(&self.identity_id(), self.name(), key, Some(value))
            .await?;
        Ok(())
    }

    pub async fn put_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        for key in values.keys() {
            validate_record_key(key)?;
        }
        self.inner
            .local
            .put_all_values(&self.identity_id(), self.name(), values)
            .await?;
        Ok(())
    }

    /// Tombstone a key; the deletion reaches the remote on the next sync.
    pub async fn remove(&self, key: &str) -> Result<()> {
        validate_record_key(key)?;
        self.inner
            .local
            .put_value(&self.identity_id(), self.name(), key, None)
            .await?;
        Ok(())
    }

    /// Key plus value size in UTF-8 bytes, `None` if the key is unknown.
    pub async fn size_in_bytes(&self, key: &str) -> Result<Option<usize>> {
        Ok(record_size(self.get_record(key).await?.as_ref()))
    }

    pub async fn total_size_in_bytes(&self) -> Result<usize> {
        Ok(total_size(&self.get_all_records().await?))
    }

    pub async fn is_modified(&self, key: &str) -> Result<bool> {
        Ok(self.get_record(key).await?.is_some_and(|r| r.is_modified))
    }

    /// Write resolved conflict records.
    pub async fn resolve(&self, records: &[Record]) -> Result<()> {
        self.inner
            .local
            .put_records(&self.identity_id(), self.name(), records)
            .await?;
        Ok(())
    }

    /// Delete locally. The next sync deletes the remote copy and purges.
    pub async fn delete(&self) -> Result<()> {
        self.inner
            .local
            .delete_dataset(&self.identity_id(), self.name())
            .await?;
        Ok(())
    }

    /// Local datasets left over from identity merges (`<name>.<suffix>`).
    pub async fn local_merged_datasets(&self) -> Result<Vec<String>> {
        find_merged_remnants(self.inner.local.as_ref(), &self.identity_id(), self.name()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Synchronization
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_syncing(&self) -> bool {
        self.inner.gate.is_running()
    }

    pub async fn synchronize(&self) -> SyncReport {
        self.synchronize_with_cancel(&CancelToken::new()).await
    }

    /// Synchronize, aborting the in-flight remote call when `cancel` fires.
    ///
    /// Returns at once with [`SyncOutcome::Coalesced`] if a pass is already
    /// running; that pass then runs once more before finishing.
    ///
    /// Dropping the returned future mid-pass reports a cancelled failure. A
    /// request queued behind the dropped pass is rerun on a spawned task.
    pub async fn synchronize_with_cancel(&self, cancel: &CancelToken) -> SyncReport {
        let Some(guard) = self.inner.gate.try_begin() else {
            tracing::debug!(dataset = %self.name(), "sync already running, queued");
            return SyncReport::coalesced();
        };
        let mut in_flight = InFlight {
            dataset: self,
            guard,
            mid_pass: false,
        };

        let mut passes = 0;
        loop {
            passes += 1;
            in_flight.mid_pass = true;
            let result = self.run_pass(cancel).await;
            in_flight.mid_pass = false;
            let outcome = match result {
                Ok(records) => {
                    tracing::info!(dataset = %self.name(), applied = records.len(), "sync succeeded");
                    self.inner.callbacks.emit_success(self.name(), &records);
                    SyncOutcome::Succeeded(records)
                }
                Err(error) => {
                    tracing::warn!(dataset = %self.name(), %error, "sync failed");
                    self.inner.callbacks.emit_failure(self.name(), &error);
                    SyncOutcome::Failed(error)
                }
            };
            if !in_flight.guard.rerun_or_release() {
                return SyncReport { passes, outcome };
            }
        }
    }

    /// Synchronize from non-async code on a private current-thread runtime.
    ///
    /// Fails instead of blocking when called from within a tokio runtime.
    pub fn synchronize_blocking(&self) -> std::io::Result<SyncReport> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(std::io::Error::other(
                "synchronize_blocking called from within an async runtime",
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(runtime.block_on(self.synchronize()))
    }

    fn spawn_queued_rerun(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let dataset = self.clone();
                handle.spawn(async move {
                    dataset.synchronize().await;
                });
            }
            Err(_) => {
                tracing::warn!(dataset = %self.name(), "no runtime to rerun queued sync request");
            }
        }
    }

    async fn run_pass(&self, cancel: &CancelToken) -> Result<Vec<Record>> {
        let pass = SyncPass {
            dataset_name: self.name(),
            identity_id: self.identity_id(),
            local: self.inner.local.as_ref(),
            remote: self.inner.remote.as_ref(),
            callbacks: &self.inner.callbacks,
            config: &self.inner.config,
            cancel,
        };
        pass.run().await
    }
}

/// The running `synchronize` call. Dropped while `mid_pass`, it stands in
/// for the pass's terminal event.
struct InFlight<'a> {
    dataset: &'a Dataset,
    guard: GateGuard<'a>,
    mid_pass: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.mid_pass {
            return;
        }
        let queued = self.guard.abandon();
        let name = self.dataset.name();
        let error = SyncError::Cancelled("synchronization dropped mid-pass".into());
        tracing::warn!(dataset = %name, queued, "sync dropped");
        self.dataset.inner.callbacks.emit_failure(name, &error);
        if queued {
            self.dataset.spawn_queued_rerun();
        }
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use syncset_store::MemoryStorage;

    use crate::{MemoryRemote, RemoteFailure, RemoteOp, StaticIdentity};

    const ID: &str = "identity-1";

    struct Harness {
        local: Arc<MemoryStorage>,
        remote: MemoryRemote,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                local: Arc::new(MemoryStorage::new()),
                remote: MemoryRemote::new(),
            }
        }

        async fn open(&self, name: &str) -> Dataset {
            self.open_with(name, SyncConfig::default()).await
        }

        async fn open_with(&self, name: &str, config: SyncConfig) -> Dataset {
            Dataset::open(
                name,
                self.local.clone(),
                Arc::new(self.remote.clone()),
                Arc::new(StaticIdentity::new(ID)),
                config,
            )
            .await
            .unwrap()
        }
    }

    fn failures(dataset: &Dataset) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        dataset
            .callbacks()
            .on_sync_failure(move |_, e| s.lock().unwrap().push(e.to_string()));
        seen
    }

    #[tokio::test]
    async fn test_local_value_operations() {
        let h = Harness::new();
        let ds = h.open("profile").await;

        ds.put("name", "ada").await.unwrap();
        ds.put("city", "london").await.unwrap();
        ds.remove("city").await.unwrap();

        assert_eq!(ds.get("name").await.unwrap().as_deref(), Some("ada"));
        assert_eq!(ds.get("city").await.unwrap(), None);
        assert_eq!(ds.get_all().await.unwrap().len(), 1);
        assert_eq!(ds.get_all_records().await.unwrap().len(), 2);
        assert!(ds.is_modified("city").await.unwrap());
        assert!(!ds.is_modified("unknown").await.unwrap());
        assert_eq!(ds.size_in_bytes("name").await.unwrap(), Some(7));
        assert_eq!(ds.size_in_bytes("unknown").await.unwrap(), None);
        assert_eq!(ds.total_size_in_bytes().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        assert!(matches!(
            ds.put("bad key", "v").await,
            Err(SyncError::Validation(_))
        ));

        let err = Dataset::open(
            "bad/name",
            h.local.clone(),
            Arc::new(h.remote.clone()),
            Arc::new(StaticIdentity::new(ID)),
            SyncConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_first_sync_pushes_local_changes() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        ds.put("a", "1").await.unwrap();
        ds.put("b", "2").await.unwrap();

        let report = ds.synchronize().await;
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.passes, 1);
        assert_eq!(report.records(), Some(&[][..]));

        assert_eq!(h.remote.sync_count("profile"), Some(1));
        assert_eq!(ds.last_sync_count().await.unwrap(), 1);
        let record = ds.get_record("a").await.unwrap().unwrap();
        assert!(!record.is_modified);
        assert_eq!(record.sync_count, 1);
    }

    #[tokio::test]
    async fn test_pull_then_idempotent_resync() {
        let h = Harness::new();
        h.remote
            .write_batch_from_other_device("profile", &[("a", Some("1")), ("b", Some("2"))]);
        let ds = h.open("profile").await;

        let first = ds.synchronize().await.into_result().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(ds.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(ds.last_sync_count().await.unwrap(), 1);

        let second = ds.synchronize().await.into_result().unwrap();
        assert!(second.is_empty());
        assert_eq!(h.remote.count_calls(RemoteOp::PutRecords), 0);
    }

    #[tokio::test]
    async fn test_older_local_change_loses_to_remote() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        let stale = Record {
            last_modified_date: Some(1),
            ..Record::local("k", Some("v1".into()), 1)
        };
        ds.resolve(&[stale]).await.unwrap();

        for key in ["w", "x", "y", "z"] {
            h.remote.write_from_other_device("profile", key, Some("o"));
        }
        assert_eq!(h.remote.write_from_other_device("profile", "k", Some("v2")), 5);

        let records = ds.synchronize().await.into_result().unwrap();
        assert_eq!(records.len(), 4);
        let k = ds.get_record("k").await.unwrap().unwrap();
        assert_eq!(k.value.as_deref(), Some("v2"));
        assert!(!k.is_modified);
        assert_eq!(ds.last_sync_count().await.unwrap(), 5);
        assert_eq!(h.remote.count_calls(RemoteOp::PutRecords), 0);
    }

    #[tokio::test]
    async fn test_newer_local_change_wins_and_is_pushed() {
        let h = Harness::new();
        h.remote.write_from_other_device("profile", "k", Some("theirs"));
        let ds = h.open("profile").await;
        ds.put("k", "mine").await.unwrap();

        assert!(ds.synchronize().await.is_success());
        assert_eq!(
            h.remote.record("profile", "k").unwrap().value.as_deref(),
            Some("mine")
        );
        assert_eq!(ds.last_sync_count().await.unwrap(), 2);
        assert!(!ds.is_modified("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_conflict_handler_override() {
        let h = Harness::new();
        h.remote.write_from_other_device("profile", "k", Some("theirs"));
        let ds = h.open("profile").await;
        ds.put("k", "mine").await.unwrap();

        ds.callbacks().on_dataset_conflict(|_, conflicts, resolver| {
            for c in conflicts {
                let merged = format!(
                    "{}+{}",
                    c.local.value.as_deref().unwrap_or(""),
                    c.remote.as_ref().and_then(|r| r.value.as_deref()).unwrap_or("")
                );
                resolver.override_value(c, Some(merged));
            }
            true
        });

        assert!(ds.synchronize().await.is_success());
        assert_eq!(ds.get("k").await.unwrap().as_deref(), Some("mine+theirs"));
        assert_eq!(
            h.remote.record("profile", "k").unwrap().value.as_deref(),
            Some("mine+theirs")
        );
    }

    #[tokio::test]
    async fn test_conflict_handler_can_cancel() {
        let h = Harness::new();
        h.remote.write_from_other_device("profile", "k", Some("theirs"));
        let ds = h.open("profile").await;
        ds.put("k", "mine").await.unwrap();
        let seen = failures(&ds);
        ds.callbacks().on_dataset_conflict(|_, _, _| false);

        let report = ds.synchronize().await;
        assert!(report.error().unwrap().is_cancelled());
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(ds.get("k").await.unwrap().as_deref(), Some("mine"));
        assert_eq!(h.remote.count_calls(RemoteOp::PutRecords), 0);
    }

    #[tokio::test]
    async fn test_push_conflict_retries_once() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        ds.put("k", "v").await.unwrap();
        h.remote.fail_next(RemoteOp::PutRecords, RemoteFailure::Conflict);

        let report = ds.synchronize().await;
        assert!(report.is_success(), "{report:?}");
        assert_eq!(h.remote.count_calls(RemoteOp::ListUpdates), 2);
        assert_eq!(h.remote.count_calls(RemoteOp::PutRecords), 2);
        assert_eq!(ds.last_sync_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_push_conflict_without_budget_fails() {
        let h = Harness::new();
        let ds = h
            .open_with("profile", SyncConfig { max_retries: 0 })
            .await;
        ds.put("k", "v").await.unwrap();
        h.remote.fail_next(RemoteOp::PutRecords, RemoteFailure::Conflict);

        let report = ds.synchronize().await;
        assert!(report.error().unwrap().is_conflict());
        assert!(ds.is_modified("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_merge_exhausts_retries() {
        let h = Harness::new();
        h.remote
            .set_merged_datasets("profile", vec!["profile.other".into()]);
        let ds = h.open("profile").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        ds.callbacks().on_dataset_merged(move |_, names| {
            assert_eq!(names, ["profile.other".to_string()]);
            c.fetch_add(1, Ordering::SeqCst);
            true
        });

        let report = ds.synchronize().await;
        assert!(matches!(report.error(), Some(SyncError::OutOfRetries(4))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(h.remote.count_calls(RemoteOp::ListUpdates), 4);
    }

    #[tokio::test]
    async fn test_remote_merge_without_handler_is_ignored() {
        let h = Harness::new();
        h.remote
            .set_merged_datasets("profile", vec!["profile.other".into()]);
        let ds = h.open("profile").await;
        ds.put("k", "v").await.unwrap();
        assert!(ds.synchronize().await.is_success());
    }

    #[tokio::test]
    async fn test_local_merge_remnant_declined() {
        let h = Harness::new();
        h.local.create_dataset(ID, "Profile.old-identity").await.unwrap();
        h.local.create_dataset(ID, "profiles").await.unwrap();
        let ds = h.open("profile").await;
        assert_eq!(
            ds.local_merged_datasets().await.unwrap(),
            vec!["Profile.old-identity".to_string()]
        );

        ds.callbacks().on_dataset_merged(|_, _| false);
        let report = ds.synchronize().await;
        assert!(report.error().unwrap().is_cancelled());
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_remote_deletion_purges_by_default() {
        let h = Harness::new();
        h.remote.write_from_other_device("profile", "k", Some("v"));
        let ds = h.open("profile").await;
        assert!(ds.synchronize().await.is_success());

        h.remote.delete_from_other_device("profile");
        let report = ds.synchronize().await;
        assert_eq!(report.records(), Some(&[][..]));
        assert!(ds.metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remote_deletion_declined_keeps_data() {
        let h = Harness::new();
        h.remote.write_from_other_device("profile", "k", Some("v"));
        let ds = h.open("profile").await;
        assert!(ds.synchronize().await.is_success());

        h.remote.delete_from_other_device("profile");
        ds.callbacks().on_dataset_deleted(|_| false);
        let report = ds.synchronize().await;
        assert!(report.error().unwrap().is_cancelled());
        assert_eq!(ds.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_local_delete_is_pushed_then_purged() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        ds.put("k", "v").await.unwrap();
        assert!(ds.synchronize().await.is_success());

        ds.delete().await.unwrap();
        assert!(ds.metadata().await.unwrap().unwrap().is_deleted());
        assert!(ds.synchronize().await.is_success());
        assert_eq!(h.remote.sync_count("profile"), None);
        assert!(ds.metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_delete_of_never_pushed_dataset() {
        let h = Harness::new();
        let ds = h.open("scratch").await;
        ds.delete().await.unwrap();
        assert!(ds.synchronize().await.is_success());
        assert_eq!(h.remote.count_calls(RemoteOp::DeleteDataset), 1);
        assert!(ds.metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_network_failure_keeps_changes_for_next_sync() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        ds.put("k", "v").await.unwrap();
        let seen = failures(&ds);
        h.remote.fail_next(RemoteOp::PutRecords, RemoteFailure::Network);

        let report = ds.synchronize().await;
        assert!(matches!(report.error(), Some(SyncError::Network(_))));
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(ds.is_modified("k").await.unwrap());

        assert!(ds.synchronize().await.is_success());
        assert!(!ds.is_modified("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_sync_releases_gate() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        ds.put("k", "v").await.unwrap();
        let token = CancelToken::new();
        token.cancel();

        let report = ds.synchronize_with_cancel(&token).await;
        assert!(report.error().unwrap().is_cancelled());
        assert!(!ds.is_syncing());
        assert!(h.remote.calls().is_empty());
        assert!(ds.synchronize().await.is_success());
    }

    #[tokio::test]
    async fn test_success_event_once_per_pass() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        let successes = Arc::new(AtomicUsize::new(0));
        let s = successes.clone();
        ds.callbacks().on_sync_success(move |name, _| {
            assert_eq!(name, "profile");
            s.fetch_add(1, Ordering::SeqCst);
        });
        let seen = failures(&ds);

        ds.synchronize().await;
        ds.synchronize().await;
        assert_eq!(successes.load(Ordering::SeqCst), 2);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_gate_coalesces_requests() {
        let gate = SyncGate::default();
        let mut guard = gate.try_begin().unwrap();
        assert!(gate.try_begin().is_none());
        assert!(gate.try_begin().is_none());
        assert!(guard.rerun_or_release());
        assert!(gate.is_running());
        assert!(!guard.rerun_or_release());
        assert!(!gate.is_running());
        drop(guard);
        assert!(gate.try_begin().is_some());
    }

    #[test]
    fn test_gate_abandon_hands_back_queued_request() {
        let gate = SyncGate::default();
        let mut guard = gate.try_begin().unwrap();
        assert!(gate.try_begin().is_none());
        assert!(guard.abandon());
        assert!(!gate.is_running());
        assert!(!guard.abandon());
        drop(guard);

        let mut guard = gate.try_begin().unwrap();
        assert!(!guard.abandon());
    }

    /// A remote whose pulls never complete.
    struct StalledRemote;

    #[async_trait::async_trait]
    impl RemoteStorage for StalledRemote {
        async fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
            Ok(Vec::new())
        }

        async fn list_updates(&self, _: &str, _: i64) -> Result<syncset_core::DatasetUpdates> {
            std::future::pending().await
        }

        async fn put_records(&self, _: &str, _: &[Record], _: &str) -> Result<Vec<Record>> {
            std::future::pending().await
        }

        async fn delete_dataset(&self, _: &str) -> Result<()> {
            Ok(())
        }

        async fn get_dataset_metadata(&self, name: &str) -> Result<DatasetMetadata> {
            Err(SyncError::DatasetNotFound(name.to_string()))
        }
    }

    #[tokio::test]
    async fn test_dropped_sync_reports_cancellation() {
        let h = Harness::new();
        let ds = Dataset::open(
            "profile",
            h.local.clone(),
            Arc::new(StalledRemote),
            Arc::new(StaticIdentity::new(ID)),
            SyncConfig::default(),
        )
        .await
        .unwrap();
        ds.put("k", "v").await.unwrap();
        let seen = failures(&ds);

        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), ds.synchronize()).await;
        assert!(timed_out.is_err());

        assert!(!ds.is_syncing());
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("cancelled"), "{seen:?}");
        assert!(ds.is_modified("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_synchronize_blocking_inside_runtime_errors() {
        let h = Harness::new();
        let ds = h.open("profile").await;
        assert!(ds.synchronize_blocking().is_err());
        assert!(!ds.is_syncing());
    }

    #[test]
    fn test_synchronize_blocking() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let h = Harness::new();
        let ds = runtime.block_on(h.open("profile"));
        runtime.block_on(ds.put("k", "v")).unwrap();
        drop(runtime);

        let report = ds.synchronize_blocking().unwrap();
        assert!(report.is_success());
        assert_eq!(h.remote.sync_count("profile"), Some(1));
    }
}
