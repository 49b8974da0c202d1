//! # syncset store
//!
//! Local persistence for datasets. The sync engine talks to storage only
//! through the [`LocalStorage`] trait, so backends are interchangeable.
//!
//! ## Overview
//!
//! Every operation is scoped by an identity id and a dataset name. Each
//! method is atomic on its own; no transaction spans calls.
//!
//! ## Key Types
//!
//! - [`LocalStorage`] - The async trait the engine and dataset handles use
//! - [`SqliteStorage`] - SQLite-based persistent storage
//! - [`MemoryStorage`] - In-memory storage, shared explicitly via `Arc`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use syncset_store::{LocalStorage, SqliteStorage};
//!
//! async fn example() {
//!     let storage = SqliteStorage::open("sync.db").unwrap();
//!
//!     storage.create_dataset("identity-1", "settings").await.unwrap();
//!     storage
//!         .put_value("identity-1", "settings", "theme", Some("dark"))
//!         .await
//!         .unwrap();
//!
//!     let modified = storage
//!         .get_modified_records("identity-1", "settings")
//!         .await
//!         .unwrap();
//!     assert_eq!(modified.len(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Tombstones**: removing a key stores a `None` value; rows are never dropped by a put
//! - **Deleted datasets**: `delete_dataset` drops records and sets `last_sync_count` to -1
//! - **Identity change**: colliding dataset names are renamed `<name>.<old identity>`

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::LocalStorage;
