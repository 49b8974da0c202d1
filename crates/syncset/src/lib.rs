//! # syncset
//!
//! Offline-first key/value datasets reconciled with an authoritative remote
//! store.
//!
//! ## Overview
//!
//! - **Datasets**: named key/value collections scoped by identity
//! - **Offline writes**: every change lands in local storage first
//! - **Synchronization**: pull remote changes, resolve conflicts, push local ones
//! - **Identity changes**: local data follows the identity; colliding
//!   datasets become merge remnants the application reconciles
//!
//! ## Key Concepts
//!
//! - **Sync count**: remote-assigned version, per record and per dataset
//! - **Tombstone**: a record whose value is `None`
//! - **Conflict**: a locally modified record whose value differs from the
//!   incoming remote value
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use syncset::{ManagerConfig, SyncManager};
//! use syncset::store::SqliteStorage;
//! use syncset::sync::{MemoryRemote, StaticIdentity};
//!
//! async fn example() {
//!     let manager = SyncManager::new(
//!         SqliteStorage::open("sync.db").unwrap(),
//!         MemoryRemote::new(),
//!         Arc::new(StaticIdentity::new("identity-1")),
//!         ManagerConfig::default(),
//!     );
//!
//!     let settings = manager.open_or_create_dataset("settings").await.unwrap();
//!     settings.put("theme", "dark").await.unwrap();
//!
//!     let report = settings.synchronize().await;
//!     println!("synced in {} pass(es)", report.passes);
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `syncset::core` - Records, metadata, conflict rules
//! - `syncset::store` - Local storage trait and backends
//! - `syncset::sync` - Remote trait, dataset handle and engine

pub mod error;
pub mod manager;

pub use syncset_core as core;
pub use syncset_store as store;
pub use syncset_sync as sync;

pub use error::{ManagerError, Result};
pub use manager::{ManagerConfig, SyncManager};

pub use syncset_core::{DatasetMetadata, Record, SyncConflict};
pub use syncset_sync::{
    CancelToken, ConflictResolver, Dataset, HandlerId, SyncConfig, SyncError, SyncOutcome,
    SyncReport,
};
