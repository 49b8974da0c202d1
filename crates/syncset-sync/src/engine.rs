//! The synchronization state machine.
//!
//! One pass runs: merge-remnant scan, then a bounded loop of
//! pull → resolve → apply → push. A push rejected for stale sync counts
//! rolls the local counter back and loops; so does a pull that reports
//! merged datasets a handler has dealt with.
//!
//! Passes of one dataset never overlap. [`SyncGate`] coalesces requests
//! made while a pass runs into a single follow-up pass.

use std::sync::{Mutex, PoisonError};

use syncset_core::{
    classify_remote_record, default_resolution, now_millis, DatasetUpdates, Incoming, Record,
    SyncConflict, DELETED_SYNC_COUNT,
};
use syncset_store::LocalStorage;

use crate::cancel::CancelToken;
use crate::error::{Result, SyncError};
use crate::events::CallbackRegistry;
use crate::remote::RemoteStorage;

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Extra passes through the pull/push loop after a push conflict or a
    /// handled merge.
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// How a `synchronize` call ended.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The last pass succeeded with these applied remote records.
    Succeeded(Vec<Record>),
    /// The last pass failed.
    Failed(SyncError),
    /// A pass was already running; this request was folded into its rerun.
    Coalesced,
}

/// Result of one `synchronize` call.
#[derive(Debug)]
pub struct SyncReport {
    /// Passes executed by this call (0 when coalesced).
    pub passes: usize,
    pub outcome: SyncOutcome,
}

impl SyncReport {
    pub(crate) fn coalesced() -> Self {
        Self {
            passes: 0,
            outcome: SyncOutcome::Coalesced,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Succeeded(_))
    }

    pub fn is_coalesced(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Coalesced)
    }

    pub fn records(&self) -> Option<&[Record]> {
        match &self.outcome {
            SyncOutcome::Succeeded(records) => Some(records),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match &self.outcome {
            SyncOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// A coalesced call yields an empty record list.
    pub fn into_result(self) -> Result<Vec<Record>> {
        match self.outcome {
            SyncOutcome::Succeeded(records) => Ok(records),
            SyncOutcome::Failed(e) => Err(e),
            SyncOutcome::Coalesced => Ok(Vec::new()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Single-flight gate
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct GateState {
    running: bool,
    queued: bool,
}

/// Per-dataset exclusion between synchronization passes.
#[derive(Debug, Default)]
pub(crate) struct SyncGate {
    state: Mutex<GateState>,
}

impl SyncGate {
    /// Claim the gate, or record a queued request if a pass is running.
    pub(crate) fn try_begin(&self) -> Option<GateGuard<'_>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.running {
            state.queued = true;
            return None;
        }
        state.running = true;
        Some(GateGuard {
            gate: self,
            released: false,
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }
}

/// Ownership of the running pass. Dropping it releases the gate.
pub(crate) struct GateGuard<'a> {
    gate: &'a SyncGate,
    released: bool,
}

impl GateGuard<'_> {
    /// Consume a queued request, or release the gate if there is none.
    pub(crate) fn rerun_or_release(&mut self) -> bool {
        let mut state = self.gate.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.queued {
            state.queued = false;
            true
        } else {
            state.running = false;
            self.released = true;
            false
        }
    }

    /// Release the gate without serving a queued request. Returns whether
    /// one was queued, so the caller can hand it on.
    pub(crate) fn abandon(&mut self) -> bool {
        if self.released {
            return false;
        }
        let mut state = self.gate.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.running = false;
        self.released = true;
        std::mem::take(&mut state.queued)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.abandon();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// One pass
// ─────────────────────────────────────────────────────────────────────────────

/// Local datasets named `<dataset_name>.<suffix>`, compared case-insensitively.
pub async fn find_merged_remnants(
    local: &dyn LocalStorage,
    identity_id: &str,
    dataset_name: &str,
) -> Result<Vec<String>> {
    let prefix = format!("{}.", dataset_name.to_lowercase());
    Ok(local
        .get_dataset_metadata_list(identity_id)
        .await?
        .into_iter()
        .map(|m| m.dataset_name)
        .filter(|name| name.to_lowercase().starts_with(&prefix))
        .collect())
}

enum Step {
    Done(Vec<Record>),
    Retry,
}

/// Everything one pass borrows. The identity is resolved once per pass.
pub(crate) struct SyncPass<'a> {
    pub dataset_name: &'a str,
    pub identity_id: String,
    pub local: &'a dyn LocalStorage,
    pub remote: &'a dyn RemoteStorage,
    pub callbacks: &'a CallbackRegistry,
    pub config: &'a SyncConfig,
    pub cancel: &'a CancelToken,
}

impl SyncPass<'_> {
    pub(crate) async fn run(&self) -> Result<Vec<Record>> {
        let remnants =
            find_merged_remnants(self.local, &self.identity_id, self.dataset_name).await?;
        if !remnants.is_empty() {
            tracing::info!(dataset = %self.dataset_name, ?remnants, "found merged datasets");
            if self.callbacks.dataset_merged(self.dataset_name, &remnants) == Some(false) {
                return Err(SyncError::Cancelled("merged dataset handler declined".into()));
            }
        }

        let mut retries_left = self.config.max_retries;
        loop {
            match self.attempt(retries_left).await? {
                Step::Done(records) => return Ok(records),
                Step::Retry => {
                    retries_left = retries_left.saturating_sub(1);
                    tracing::debug!(dataset = %self.dataset_name, retries_left, "retrying sync");
                }
            }
        }
    }

    /// One pull/resolve/push round. `Step::Retry` is only returned while
    /// `retries_left > 0`.
    async fn attempt(&self, retries_left: u32) -> Result<Step> {
        let (identity_id, name) = (self.identity_id.as_str(), self.dataset_name);
        let last_sync_count = self.local.get_last_sync_count(identity_id, name).await?;

        if last_sync_count == DELETED_SYNC_COUNT {
            return self.push_deletion().await.map(Step::Done);
        }

        let updates = self
            .cancel
            .guard(self.remote.list_updates(name, last_sync_count))
            .await?;
        tracing::debug!(
            dataset = %name,
            last_sync_count,
            remote_sync_count = updates.sync_count,
            records = updates.records.len(),
            "pulled updates"
        );

        if !updates.merged_dataset_names.is_empty() && self.callbacks.has_merged_handler() {
            return match self
                .callbacks
                .dataset_merged(name, &updates.merged_dataset_names)
            {
                Some(false) => Err(SyncError::Cancelled("merged dataset handler declined".into())),
                _ if retries_left == 0 => Err(SyncError::OutOfRetries(self.config.max_retries + 1)),
                _ => Ok(Step::Retry),
            };
        }

        if (!updates.exists && last_sync_count != 0) || updates.deleted {
            return self.accept_remote_deletion().await.map(Step::Done);
        }

        let accepted = self.apply_remote(&updates, last_sync_count).await?;
        self.push(&updates, accepted, retries_left).await
    }

    /// Propagate a local deletion, then forget the dataset.
    async fn push_deletion(&self) -> Result<Vec<Record>> {
        match self.cancel.guard(self.remote.delete_dataset(self.dataset_name)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::warn!(dataset = %self.dataset_name, "dataset already absent remotely");
            }
            Err(e) => return Err(e),
        }
        self.local
            .purge_dataset(&self.identity_id, self.dataset_name)
            .await?;
        tracing::info!(dataset = %self.dataset_name, "pushed local deletion");
        Ok(Vec::new())
    }

    async fn accept_remote_deletion(&self) -> Result<Vec<Record>> {
        // No handler means the remote deletion is accepted.
        if self.callbacks.dataset_deleted(self.dataset_name) == Some(false) {
            return Err(SyncError::Cancelled("dataset deleted handler declined".into()));
        }
        self.local
            .delete_dataset(&self.identity_id, self.dataset_name)
            .await?;
        self.local
            .purge_dataset(&self.identity_id, self.dataset_name)
            .await?;
        tracing::info!(dataset = %self.dataset_name, "dataset deleted remotely, purged locally");
        Ok(Vec::new())
    }

    /// Split pulled records into conflicts and accepted changes, resolve
    /// the conflicts and write everything locally. Returns the accepted
    /// remote records.
    async fn apply_remote(
        &self,
        updates: &DatasetUpdates,
        last_sync_count: i64,
    ) -> Result<Vec<Record>> {
        let (identity_id, name) = (self.identity_id.as_str(), self.dataset_name);

        let mut accepted = Vec::new();
        let mut conflicts: Vec<SyncConflict> = Vec::new();
        for remote in &updates.records {
            let local = self.local.get_record(identity_id, name, &remote.key).await?;
            match classify_remote_record(local, remote.clone()) {
                Incoming::Accept(record) => accepted.push(record),
                Incoming::Conflict(conflict) => conflicts.push(conflict),
            }
        }

        if !conflicts.is_empty() {
            tracing::info!(dataset = %name, conflicts = conflicts.len(), "resolving conflicts");
            let resolved = match self.callbacks.dataset_conflict(name, &conflicts) {
                Some((true, resolved)) => resolved,
                Some((false, _)) => {
                    return Err(SyncError::Cancelled("conflict handler declined".into()));
                }
                None => default_resolution(&conflicts, now_millis()),
            };
            if !resolved.is_empty() {
                self.local.put_records(identity_id, name, &resolved).await?;
            }
        }

        if !accepted.is_empty() {
            self.local.put_records(identity_id, name, &accepted).await?;
        }

        if updates.sync_count != last_sync_count {
            self.local
                .update_last_sync_count(identity_id, name, updates.sync_count)
                .await?;
        }

        Ok(accepted)
    }

    async fn push(
        &self,
        updates: &DatasetUpdates,
        accepted: Vec<Record>,
        retries_left: u32,
    ) -> Result<Step> {
        let (identity_id, name) = (self.identity_id.as_str(), self.dataset_name);

        let modified = self.local.get_modified_records(identity_id, name).await?;
        if modified.is_empty() {
            return Ok(Step::Done(accepted));
        }
        let max_patch_sync_count = modified.iter().map(|r| r.sync_count).max().unwrap_or(0);

        let pushed = self
            .cancel
            .guard(
                self.remote
                    .put_records(name, &modified, &updates.sync_session_token),
            )
            .await;

        match pushed {
            Ok(committed) => {
                let stored = self.merge_committed(&modified, committed).await?;
                self.local.put_records(identity_id, name, &stored).await?;

                let new_sync_count = stored.iter().map(|r| r.sync_count).max().unwrap_or(0);
                if new_sync_count == updates.sync_count + 1 {
                    self.local
                        .update_last_sync_count(identity_id, name, new_sync_count)
                        .await?;
                } else {
                    tracing::debug!(
                        dataset = %name,
                        new_sync_count,
                        pulled = updates.sync_count,
                        "another writer interleaved, not advancing sync count"
                    );
                }
                tracing::info!(dataset = %name, pushed = stored.len(), "pushed local changes");
                Ok(Step::Done(accepted))
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(dataset = %name, error = %e, retries_left, "push rejected");
                if retries_left == 0 {
                    return Err(e);
                }
                if updates.sync_count > max_patch_sync_count {
                    self.local
                        .update_last_sync_count(identity_id, name, max_patch_sync_count)
                        .await?;
                }
                Ok(Step::Retry)
            }
            Err(e) => Err(e),
        }
    }

    /// Committed records replace their local copies, unless the local
    /// value changed while the push was in flight; such records keep the
    /// newer value and stay modified at the committed sync count.
    async fn merge_committed(&self, pushed: &[Record], committed: Vec<Record>) -> Result<Vec<Record>> {
        let mut stored = Vec::with_capacity(committed.len());
        for record in committed {
            let sent = pushed.iter().find(|p| p.key == record.key);
            let current = self
                .local
                .get_record(&self.identity_id, self.dataset_name, &record.key)
                .await?;
            match (sent, current) {
                (Some(sent), Some(current)) if current.value != sent.value => {
                    stored.push(Record {
                        sync_count: record.sync_count,
                        ..current
                    });
                }
                _ => stored.push(record),
            }
        }
        Ok(stored)
    }
}
