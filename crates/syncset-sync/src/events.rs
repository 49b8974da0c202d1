//! Callback registry for synchronization events.
//!
//! Each event slot holds an ordered list of handlers. Registration returns a
//! [`HandlerId`] for later removal. Handlers are invoked from a snapshot
//! taken before the call, with no lock held, so a handler may register or
//! remove handlers or start another synchronization.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use syncset_core::{now_millis, Record, SyncConflict};

use crate::error::SyncError;

pub type SuccessHandler = Arc<dyn Fn(&str, &[Record]) + Send + Sync>;
pub type FailureHandler = Arc<dyn Fn(&str, &SyncError) + Send + Sync>;
pub type ConflictHandler =
    Arc<dyn Fn(&str, &[SyncConflict], &mut ConflictResolver) -> bool + Send + Sync>;
pub type DeletedHandler = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type MergedHandler = Arc<dyn Fn(&str, &[String]) -> bool + Send + Sync>;

/// Handle returned on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Collects the records a conflict handler decides on.
///
/// Conflicts left unresolved keep their local record untouched; its next
/// push is then rejected by the remote and the pass retries.
#[derive(Debug, Default)]
pub struct ConflictResolver {
    resolved: Vec<Record>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an arbitrary resolved record.
    pub fn resolve(&mut self, record: Record) {
        self.resolved.push(record);
    }

    pub fn keep_local(&mut self, conflict: &SyncConflict) {
        self.resolve(conflict.resolve_with_local_record(now_millis()));
    }

    pub fn keep_remote(&mut self, conflict: &SyncConflict) {
        self.resolve(conflict.resolve_with_remote_record());
    }

    pub fn override_value(&mut self, conflict: &SyncConflict, value: Option<String>) {
        self.resolve(conflict.resolve_with_value(value, now_millis()));
    }

    pub fn resolved(&self) -> &[Record] {
        &self.resolved
    }

    pub fn into_records(self) -> Vec<Record> {
        self.resolved
    }
}

#[derive(Default)]
struct Handlers {
    success: Vec<(HandlerId, SuccessHandler)>,
    failure: Vec<(HandlerId, FailureHandler)>,
    conflict: Vec<(HandlerId, ConflictHandler)>,
    deleted: Vec<(HandlerId, DeletedHandler)>,
    merged: Vec<(HandlerId, MergedHandler)>,
}

impl Handlers {
    fn len(&self) -> usize {
        self.success.len()
            + self.failure.len()
            + self.conflict.len()
            + self.deleted.len()
            + self.merged.len()
    }
}

/// Registered callbacks of one dataset handle.
#[derive(Default)]
pub struct CallbackRegistry {
    next_id: AtomicU64,
    handlers: RwLock<Handlers>,
}

fn snapshot<H: Clone>(slot: &[(HandlerId, H)]) -> Vec<H> {
    slot.iter().map(|(_, h)| h.clone()).collect()
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, add: impl FnOnce(&mut Handlers, HandlerId)) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        add(&mut handlers, id);
        id
    }

    fn with_handlers<T>(&self, f: impl FnOnce(&Handlers) -> T) -> T {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f(&handlers)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn on_sync_success(
        &self,
        handler: impl Fn(&str, &[Record]) + Send + Sync + 'static,
    ) -> HandlerId {
        self.register(|h, id| h.success.push((id, Arc::new(handler))))
    }

    pub fn on_sync_failure(
        &self,
        handler: impl Fn(&str, &SyncError) + Send + Sync + 'static,
    ) -> HandlerId {
        self.register(|h, id| h.failure.push((id, Arc::new(handler))))
    }

    /// Return `true` to continue the pass with the staged resolutions,
    /// `false` to cancel it.
    pub fn on_dataset_conflict(
        &self,
        handler: impl Fn(&str, &[SyncConflict], &mut ConflictResolver) -> bool
            + Send
            + Sync
            + 'static,
    ) -> HandlerId {
        self.register(|h, id| h.conflict.push((id, Arc::new(handler))))
    }

    /// Return `true` to accept the remote deletion and purge local data.
    pub fn on_dataset_deleted(
        &self,
        handler: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> HandlerId {
        self.register(|h, id| h.deleted.push((id, Arc::new(handler))))
    }

    /// Return `true` once the merged datasets have been dealt with.
    pub fn on_dataset_merged(
        &self,
        handler: impl Fn(&str, &[String]) -> bool + Send + Sync + 'static,
    ) -> HandlerId {
        self.register(|h, id| h.merged.push((id, Arc::new(handler))))
    }

    /// Remove one handler from whichever slot holds it.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut h = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = h.len();
        h.success.retain(|(i, _)| *i != id);
        h.failure.retain(|(i, _)| *i != id);
        h.conflict.retain(|(i, _)| *i != id);
        h.deleted.retain(|(i, _)| *i != id);
        h.merged.retain(|(i, _)| *i != id);
        h.len() < before
    }

    pub fn clear(&self) {
        let mut h = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        *h = Handlers::default();
    }

    pub fn has_merged_handler(&self) -> bool {
        self.with_handlers(|h| !h.merged.is_empty())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    pub(crate) fn emit_success(&self, dataset: &str, records: &[Record]) {
        for handler in self.with_handlers(|h| snapshot(&h.success)) {
            handler(dataset, records);
        }
    }

    pub(crate) fn emit_failure(&self, dataset: &str, error: &SyncError) {
        for handler in self.with_handlers(|h| snapshot(&h.failure)) {
            handler(dataset, error);
        }
    }

    /// `None` when no handler is registered. Every handler runs; the answer
    /// is `true` only if all of them agree.
    pub(crate) fn dataset_deleted(&self, dataset: &str) -> Option<bool> {
        let handlers = self.with_handlers(|h| snapshot(&h.deleted));
        if handlers.is_empty() {
            return None;
        }
        Some(handlers.iter().fold(true, |ok, h| h(dataset) && ok))
    }

    pub(crate) fn dataset_merged(&self, dataset: &str, merged: &[String]) -> Option<bool> {
        let handlers = self.with_handlers(|h| snapshot(&h.merged));
        if handlers.is_empty() {
            return None;
        }
        Some(handlers.iter().fold(true, |ok, h| h(dataset, merged) && ok))
    }

    /// `None` when no handler is registered, otherwise the combined verdict
    /// and the records staged by every handler.
    pub(crate) fn dataset_conflict(
        &self,
        dataset: &str,
        conflicts: &[SyncConflict],
    ) -> Option<(bool, Vec<Record>)> {
        let handlers = self.with_handlers(|h| snapshot(&h.conflict));
        if handlers.is_empty() {
            return None;
        }
        let mut resolver = ConflictResolver::new();
        let proceed = handlers
            .iter()
            .fold(true, |ok, h| h(dataset, conflicts, &mut resolver) && ok);
        Some((proceed, resolver.into_records()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_handlers_run_in_registration_order() {
        let registry = CallbackRegistry::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            registry.on_sync_success(move |_, _| order.lock().unwrap().push(n));
        }
        registry.emit_success("ds", &[]);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_and_clear() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = registry.on_sync_success(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        registry.on_dataset_deleted(|_| false);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.emit_success("ds", &[]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(registry.dataset_deleted("ds"), Some(false));
        registry.clear();
        assert_eq!(registry.dataset_deleted("ds"), None);
    }

    #[test]
    fn test_bool_slots_require_every_handler() {
        let registry = CallbackRegistry::new();
        let second_ran = Arc::new(AtomicUsize::new(0));
        registry.on_dataset_merged(|_, _| false);
        let s = second_ran.clone();
        registry.on_dataset_merged(move |_, _| {
            s.fetch_add(1, Ordering::SeqCst);
            true
        });
        assert_eq!(registry.dataset_merged("ds", &["ds.old".into()]), Some(false));
        assert_eq!(second_ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_can_mutate_registry() {
        let registry = Arc::new(CallbackRegistry::new());
        let inner = registry.clone();
        registry.on_dataset_deleted(move |_| {
            inner.clear();
            true
        });
        assert_eq!(registry.dataset_deleted("ds"), Some(true));
        assert_eq!(registry.dataset_deleted("ds"), None);
    }

    #[test]
    fn test_conflict_resolutions_are_collected() {
        let registry = CallbackRegistry::new();
        registry.on_dataset_conflict(|_, conflicts, resolver| {
            for c in conflicts {
                resolver.override_value(c, Some("merged".into()));
            }
            true
        });
        let conflict = SyncConflict::new(
            Record::local("k", Some("a".into()), 1),
            Some(Record::remote("k", Some("b".into()), 4, 2)),
        );
        let (proceed, records) = registry.dataset_conflict("ds", &[conflict]).unwrap();
        assert!(proceed);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value.as_deref(), Some("merged"));
        assert_eq!(records[0].sync_count, 4);
    }
}
