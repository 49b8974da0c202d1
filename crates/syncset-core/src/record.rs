//! The record model.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// A versioned key/value entry of a dataset.
///
/// `sync_count` is assigned by the remote store; locally created records
/// start at 0. `is_modified` marks a local change the remote has not yet
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub key: String,
    /// `None` marks a tombstone.
    pub value: Option<String>,
    pub sync_count: i64,
    pub last_modified_date: Option<i64>,
    pub last_modified_by: Option<String>,
    pub device_last_modified_date: Option<i64>,
    pub is_modified: bool,
}

impl Record {
    /// A record as the remote store reports it: committed and unmodified.
    pub fn remote(
        key: impl Into<String>,
        value: Option<String>,
        sync_count: i64,
        last_modified_date: i64,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            sync_count,
            last_modified_date: Some(last_modified_date),
            last_modified_by: None,
            device_last_modified_date: None,
            is_modified: false,
        }
    }

    /// A fresh local write that has never been synced.
    pub fn local(key: impl Into<String>, value: Option<String>, now: i64) -> Self {
        Self {
            key: key.into(),
            value,
            sync_count: 0,
            last_modified_date: Some(now),
            last_modified_by: None,
            device_last_modified_date: Some(now),
            is_modified: true,
        }
    }

    pub fn with_modified_by(mut self, by: impl Into<String>) -> Self {
        self.last_modified_by = Some(by.into());
        self
    }

    /// True for tombstones.
    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }

    /// Apply a local mutation in place. Returns `false` if the value is unchanged.
    pub fn apply_local_change(&mut self, value: Option<String>, now: i64) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.is_modified = true;
        self.last_modified_date = Some(now);
        self.device_last_modified_date = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_change_is_noop_for_same_value() {
        let mut record = Record::remote("k", Some("v".into()), 4, 10);
        assert!(!record.apply_local_change(Some("v".into()), 20));
        assert!(!record.is_modified);
        assert_eq!(record.last_modified_date, Some(10));
    }

    #[test]
    fn test_local_change_keeps_sync_count() {
        let mut record = Record::remote("k", Some("v".into()), 4, 10);
        assert!(record.apply_local_change(None, 20));
        assert!(record.is_deleted());
        assert!(record.is_modified);
        assert_eq!(record.sync_count, 4);
        assert_eq!(record.device_last_modified_date, Some(20));

        // Resurrection continues the same sync count.
        assert!(record.apply_local_change(Some("back".into()), 30));
        assert_eq!(record.sync_count, 4);
        assert_eq!(record.value.as_deref(), Some("back"));
    }

    #[test]
    fn test_json_field_names() {
        let record = Record::local("score", Some("12".into()), 5).with_modified_by("device-a");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["syncCount"], 0);
        assert_eq!(json["isModified"], true);
        assert_eq!(json["lastModifiedBy"], "device-a");

        let back: Record = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
