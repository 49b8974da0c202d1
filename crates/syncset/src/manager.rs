//! The sync manager: entry point for opening datasets of the current
//! identity and for identity-wide maintenance.

use std::sync::Arc;

use syncset_core::{validate_dataset_name, DatasetMetadata};
use syncset_store::LocalStorage;
use syncset_sync::{Dataset, IdentityProvider, RemoteStorage, SyncConfig};

use crate::error::Result;

/// Configuration for the manager.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Applied to every dataset the manager opens.
    pub sync: SyncConfig,
}

/// Opens datasets and keeps local metadata in step with the remote.
pub struct SyncManager {
    local: Arc<dyn LocalStorage>,
    remote: Arc<dyn RemoteStorage>,
    identity: Arc<dyn IdentityProvider>,
    config: ManagerConfig,
}

impl SyncManager {
    pub fn new(
        local: impl LocalStorage + 'static,
        remote: impl RemoteStorage + 'static,
        identity: Arc<dyn IdentityProvider>,
        config: ManagerConfig,
    ) -> Self {
        Self::from_parts(Arc::new(local), Arc::new(remote), identity, config)
    }

    /// Build from shared backends.
    pub fn from_parts(
        local: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<dyn IdentityProvider>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            local,
            remote,
            identity,
            config,
        }
    }

    pub fn identity_id(&self) -> String {
        self.identity.identity_id()
    }

    pub fn local(&self) -> &Arc<dyn LocalStorage> {
        &self.local
    }

    /// Open a dataset of the current identity, creating it locally if needed.
    pub async fn open_or_create_dataset(&self, name: &str) -> Result<Dataset> {
        validate_dataset_name(name)?;
        let dataset = Dataset::open(
            name,
            self.local.clone(),
            self.remote.clone(),
            self.identity.clone(),
            self.config.sync.clone(),
        )
        .await?;
        Ok(dataset)
    }

    /// Local metadata of every dataset of the current identity.
    pub async fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        Ok(self
            .local
            .get_dataset_metadata_list(&self.identity_id())
            .await?)
    }

    /// Fetch dataset metadata from the remote and store it locally.
    pub async fn refresh_dataset_metadata(&self) -> Result<Vec<DatasetMetadata>> {
        let remote = self.remote.list_datasets().await?;
        self.local
            .update_dataset_metadata(&self.identity_id(), &remote)
            .await?;
        tracing::info!(datasets = remote.len(), "refreshed dataset metadata");
        Ok(remote)
    }

    /// Remove all local data of every identity.
    pub async fn wipe_data(&self) -> Result<()> {
        self.local.wipe_data().await?;
        tracing::info!("wiped local data");
        Ok(())
    }

    /// Move local datasets to a new identity. Datasets the new identity
    /// already has are kept as `<name>.<old identity>` remnants, which the
    /// next synchronization of `<name>` reports to its merge handlers.
    pub async fn identity_changed(&self, old_identity_id: &str, new_identity_id: &str) -> Result<()> {
        if old_identity_id == new_identity_id {
            return Ok(());
        }
        self.local
            .change_identity_id(old_identity_id, new_identity_id)
            .await?;
        tracing::info!(old = old_identity_id, new = new_identity_id, "identity changed");
        Ok(())
    }
}
