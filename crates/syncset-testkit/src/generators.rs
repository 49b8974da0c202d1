//! Proptest generators for property-based testing.

use proptest::prelude::*;

use syncset_core::{Record, SyncConflict};

/// A valid record key.
pub fn record_key() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.:-]{1,128}".prop_map(String::from)
}

/// A value or a tombstone.
pub fn record_value() -> impl Strategy<Value = Option<String>> {
    prop::option::weighted(0.85, "[ -~]{0,64}".prop_map(String::from))
}

/// A reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_900_000_000_000i64
}

/// Parameters for generating a record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub key: String,
    pub value: Option<String>,
    pub sync_count: i64,
    pub last_modified_date: Option<i64>,
    pub is_modified: bool,
}

impl RecordParams {
    pub fn record(&self) -> Record {
        Record {
            key: self.key.clone(),
            value: self.value.clone(),
            sync_count: self.sync_count,
            last_modified_date: self.last_modified_date,
            last_modified_by: None,
            device_last_modified_date: self.last_modified_date,
            is_modified: self.is_modified,
        }
    }
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            record_key(),
            record_value(),
            0i64..=10_000i64,
            prop::option::weighted(0.9, timestamp()),
            any::<bool>(),
        )
            .prop_map(|(key, value, sync_count, date, is_modified)| RecordParams {
                key,
                value,
                sync_count,
                last_modified_date: date,
                is_modified,
            })
            .boxed()
    }
}

/// A local/remote pair for one key, not necessarily in conflict.
#[derive(Debug, Clone)]
pub struct ConflictParams {
    pub local: Record,
    pub remote: Record,
}

impl ConflictParams {
    pub fn conflict(&self) -> SyncConflict {
        SyncConflict::new(self.local.clone(), Some(self.remote.clone()))
    }
}

impl Arbitrary for ConflictParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (any::<RecordParams>(), any::<RecordParams>())
            .prop_map(|(local, remote)| {
                let mut remote = remote.record();
                remote.key = local.key.clone();
                remote.is_modified = false;
                ConflictParams {
                    local: local.record(),
                    remote,
                }
            })
            .boxed()
    }
}
