//! Test fixtures and helpers.

use std::sync::Arc;

use syncset::{ManagerConfig, SyncManager};
use syncset_core::Record;
use syncset_store::{LocalStorage, MemoryStorage};
use syncset_sync::{
    Dataset, IdentityProvider, MemoryRemote, RemoteStorage, StaticIdentity, SyncConfig,
};

/// In-memory local storage, an in-memory remote and a fixed identity.
pub struct TestFixture {
    pub identity: Arc<StaticIdentity>,
    pub local: Arc<MemoryStorage>,
    pub remote: MemoryRemote,
    pub config: SyncConfig,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_identity("test-identity")
    }

    pub fn with_identity(identity_id: &str) -> Self {
        Self {
            identity: Arc::new(StaticIdentity::new(identity_id)),
            local: Arc::new(MemoryStorage::new()),
            remote: MemoryRemote::new(),
            config: SyncConfig::default(),
        }
    }

    pub fn identity_id(&self) -> String {
        self.identity.identity_id()
    }

    /// Open a dataset over the fixture's backends.
    pub async fn open(&self, name: &str) -> Dataset {
        self.open_over(name, self.local.clone(), Arc::new(self.remote.clone()))
            .await
    }

    /// Open a dataset over substitute backends, e.g. wrapped ones.
    pub async fn open_over(
        &self,
        name: &str,
        local: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteStorage>,
    ) -> Dataset {
        Dataset::open(name, local, remote, self.identity.clone(), self.config.clone())
            .await
            .expect("open dataset")
    }

    pub fn manager(&self) -> SyncManager {
        SyncManager::from_parts(
            self.local.clone(),
            Arc::new(self.remote.clone()),
            self.identity.clone(),
            ManagerConfig {
                sync: self.config.clone(),
            },
        )
    }

    /// Store a modified local record with an explicit modification date.
    pub async fn put_local_at(&self, dataset: &str, key: &str, value: &str, modified_at: i64) {
        let record = Record::local(key, Some(value.to_string()), modified_at);
        self.local
            .put_records(&self.identity_id(), dataset, &[record])
            .await
            .expect("put local record");
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
