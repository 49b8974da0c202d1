//! # syncset core
//!
//! Pure primitives for dataset synchronization: records, dataset metadata,
//! pull results and conflict resolution.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! plain data plus the deterministic rules the sync engine applies to it.
//!
//! ## Key Types
//!
//! - [`Record`] - A versioned key/value entry; a `None` value is a tombstone
//! - [`DatasetMetadata`] - Per-dataset bookkeeping including `last_sync_count`
//! - [`DatasetUpdates`] - The result of one pull from the remote store
//! - [`SyncConflict`] - A modified local record paired with a differing remote one
//!
//! ## Conflict Rules
//!
//! Detection and the default last-writer-wins policy live in [`conflict`].

pub mod conflict;
pub mod error;
pub mod metadata;
pub mod record;
pub mod validation;

pub use conflict::{
    classify_remote_record, default_resolution, detect_conflict, Incoming, SyncConflict,
};
pub use error::ValidationError;
pub use metadata::{DatasetMetadata, DatasetUpdates, DELETED_SYNC_COUNT};
pub use record::{now_millis, Record};
pub use validation::{
    record_size, total_size, validate_dataset_name, validate_record_key, MAX_NAME_LENGTH,
};
