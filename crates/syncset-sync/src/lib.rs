//! # syncset sync
//!
//! Reconciles local datasets with an authoritative remote store.
//!
//! ## Overview
//!
//! A [`Dataset`] is mutated locally while offline. [`Dataset::synchronize`]
//! then runs a pass of the sync state machine:
//!
//! 1. Look for local merge remnants (`<name>.<suffix>`) and report them
//! 2. Push a pending local deletion, if any
//! 3. Pull remote changes since the last sync count
//! 4. Detect conflicts against locally modified records and resolve them
//! 5. Apply the remaining remote changes locally
//! 6. Push local changes with the pull's session token
//!
//! A push rejected for stale sync counts rolls the local counter back and
//! repeats from step 3, up to [`SyncConfig::max_retries`] times.
//!
//! ## Key Properties
//!
//! - **Single-flight**: passes of one dataset never overlap; requests made
//!   during a pass coalesce into one rerun
//! - **One event per pass**: exactly one success or failure callback
//! - **Remote-assigned versions**: sync counts only come from the remote
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use syncset_store::MemoryStorage;
//! use syncset_sync::{Dataset, MemoryRemote, StaticIdentity, SyncConfig};
//!
//! async fn example() {
//!     let dataset = Dataset::open(
//!         "settings",
//!         Arc::new(MemoryStorage::new()),
//!         Arc::new(MemoryRemote::new()),
//!         Arc::new(StaticIdentity::new("identity-1")),
//!         SyncConfig::default(),
//!     )
//!     .await
//!     .unwrap();
//!
//!     dataset.put("theme", "dark").await.unwrap();
//!     dataset.callbacks().on_sync_success(|name, records| {
//!         println!("{name}: applied {} remote records", records.len());
//!     });
//!
//!     let report = dataset.synchronize().await;
//!     assert!(report.is_success());
//! }
//! ```

pub mod cancel;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod remote;

pub use cancel::CancelToken;
pub use dataset::Dataset;
pub use engine::{find_merged_remnants, SyncConfig, SyncOutcome, SyncReport};
pub use error::{Result, SyncError};
pub use events::{CallbackRegistry, ConflictResolver, HandlerId};
pub use identity::{IdentityProvider, StaticIdentity};
pub use remote::{
    memory::{MemoryRemote, MemoryRemoteConfig, RemoteCall, RemoteFailure, RemoteOp},
    RemoteStorage,
};
