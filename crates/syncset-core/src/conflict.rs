//! Conflict detection and resolution.
//!
//! A conflict exists only when the local copy of a key carries an unsynced
//! change and its value differs from the incoming remote value. Everything
//! else the remote sends is accepted as-is.

use crate::record::Record;

/// A modified local record paired with the remote version of the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConflict {
    pub local: Record,
    /// `None` when the remote holds no counterpart; such conflicts always
    /// resolve to the local record.
    pub remote: Option<Record>,
}

impl SyncConflict {
    pub fn new(local: Record, remote: Option<Record>) -> Self {
        Self { local, remote }
    }

    pub fn key(&self) -> &str {
        &self.local.key
    }

    fn remote_sync_count(&self) -> i64 {
        self.remote
            .as_ref()
            .map_or(self.local.sync_count, |r| r.sync_count)
    }

    /// Keep the local value. The result takes the remote sync count so the
    /// following push passes the remote's optimistic check.
    pub fn resolve_with_local_record(&self, now: i64) -> Record {
        Record {
            key: self.local.key.clone(),
            value: self.local.value.clone(),
            sync_count: self.remote_sync_count(),
            last_modified_date: Some(now),
            last_modified_by: self.local.last_modified_by.clone(),
            device_last_modified_date: self.local.device_last_modified_date,
            is_modified: true,
        }
    }

    /// Take the remote record verbatim.
    pub fn resolve_with_remote_record(&self) -> Record {
        match &self.remote {
            Some(remote) => Record {
                is_modified: false,
                ..remote.clone()
            },
            None => self.local.clone(),
        }
    }

    /// Replace both sides with a caller-chosen value.
    pub fn resolve_with_value(&self, value: Option<String>, now: i64) -> Record {
        Record {
            key: self.local.key.clone(),
            value,
            sync_count: self.remote_sync_count(),
            last_modified_date: Some(now),
            last_modified_by: self.local.last_modified_by.clone(),
            device_last_modified_date: Some(now),
            is_modified: true,
        }
    }
}

/// True when `local` holds an unsynced change that disagrees with `remote`.
pub fn detect_conflict(local: Option<&Record>, remote: &Record) -> bool {
    match local {
        Some(local) => local.is_modified && local.value != remote.value,
        None => false,
    }
}

/// How a pulled remote record is handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Accept(Record),
    Conflict(SyncConflict),
}

pub fn classify_remote_record(local: Option<Record>, remote: Record) -> Incoming {
    match local {
        Some(local) if detect_conflict(Some(&local), &remote) => {
            Incoming::Conflict(SyncConflict::new(local, Some(remote)))
        }
        _ => Incoming::Accept(remote),
    }
}

/// Last-writer-wins by `last_modified_date`.
///
/// Local wins when its date is later or equal, or when the remote record or
/// its date is missing.
pub fn default_resolution(conflicts: &[SyncConflict], now: i64) -> Vec<Record> {
    conflicts
        .iter()
        .map(|conflict| {
            let local_wins = match &conflict.remote {
                None => true,
                Some(remote) => match (conflict.local.last_modified_date, remote.last_modified_date)
                {
                    (_, None) => true,
                    (None, Some(_)) => false,
                    (Some(local), Some(remote)) => local >= remote,
                },
            };
            if local_wins {
                conflict.resolve_with_local_record(now)
            } else {
                conflict.resolve_with_remote_record()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modified(key: &str, value: &str, date: i64) -> Record {
        Record::local(key, Some(value.into()), date)
    }

    #[test]
    fn test_unmodified_local_never_conflicts() {
        let local = Record::remote("k", Some("a".into()), 1, 10);
        let remote = Record::remote("k", Some("b".into()), 2, 20);
        assert!(!detect_conflict(Some(&local), &remote));
        assert!(!detect_conflict(None, &remote));
    }

    #[test]
    fn test_equal_values_do_not_conflict() {
        let local = modified("k", "same", 10);
        let remote = Record::remote("k", Some("same".into()), 2, 20);
        assert!(!detect_conflict(Some(&local), &remote));
    }

    #[test]
    fn test_tombstone_against_value_conflicts() {
        let mut local = Record::remote("k", Some("a".into()), 1, 10);
        local.apply_local_change(None, 15);
        let remote = Record::remote("k", Some("b".into()), 2, 20);
        assert!(detect_conflict(Some(&local), &remote));
    }

    #[test]
    fn test_classify() {
        let remote = Record::remote("k", Some("b".into()), 2, 20);
        match classify_remote_record(Some(modified("k", "a", 5)), remote.clone()) {
            Incoming::Conflict(c) => {
                assert_eq!(c.key(), "k");
                assert_eq!(c.remote.as_ref(), Some(&remote));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(
            classify_remote_record(Some(modified("k", "b", 5)), remote.clone()),
            Incoming::Accept(remote.clone())
        );
        let synced = Record::remote("k", Some("a".into()), 1, 5);
        assert_eq!(
            classify_remote_record(Some(synced), remote.clone()),
            Incoming::Accept(remote.clone())
        );
        assert_eq!(
            classify_remote_record(None, remote.clone()),
            Incoming::Accept(remote)
        );
    }

    #[test]
    fn test_resolve_with_local_adopts_remote_sync_count() {
        let conflict = SyncConflict::new(
            modified("k", "mine", 10),
            Some(Record::remote("k", Some("theirs".into()), 7, 20)),
        );
        let resolved = conflict.resolve_with_local_record(99);
        assert_eq!(resolved.value.as_deref(), Some("mine"));
        assert_eq!(resolved.sync_count, 7);
        assert_eq!(resolved.last_modified_date, Some(99));
        assert!(resolved.is_modified);
    }

    #[test]
    fn test_resolve_with_remote_is_unmodified() {
        let conflict = SyncConflict::new(
            modified("k", "mine", 10),
            Some(Record::remote("k", Some("theirs".into()), 7, 20)),
        );
        let resolved = conflict.resolve_with_remote_record();
        assert_eq!(resolved.value.as_deref(), Some("theirs"));
        assert_eq!(resolved.sync_count, 7);
        assert!(!resolved.is_modified);
    }

    #[test]
    fn test_resolve_with_value() {
        let conflict = SyncConflict::new(
            modified("k", "mine", 10),
            Some(Record::remote("k", Some("theirs".into()), 7, 20)),
        );
        let resolved = conflict.resolve_with_value(Some("merged".into()), 50);
        assert_eq!(resolved.value.as_deref(), Some("merged"));
        assert_eq!(resolved.sync_count, 7);
        assert!(resolved.is_modified);
    }

    #[test]
    fn test_default_resolution() {
        let newer_local = SyncConflict::new(
            modified("a", "local", 30),
            Some(Record::remote("a", Some("remote".into()), 3, 20)),
        );
        let newer_remote = SyncConflict::new(
            modified("b", "local", 10),
            Some(Record::remote("b", Some("remote".into()), 3, 20)),
        );
        let tie = SyncConflict::new(
            modified("c", "local", 20),
            Some(Record::remote("c", Some("remote".into()), 3, 20)),
        );
        let missing_remote = SyncConflict::new(modified("d", "local", 1), None);

        let resolved = default_resolution(&[newer_local, newer_remote, tie, missing_remote], 100);
        let values: Vec<_> = resolved.iter().map(|r| r.value.as_deref()).collect();
        assert_eq!(
            values,
            vec![Some("local"), Some("remote"), Some("local"), Some("local")]
        );
        assert!(resolved[0].is_modified);
        assert!(!resolved[1].is_modified);
    }
}
