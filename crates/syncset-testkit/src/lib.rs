//! # syncset testkit
//!
//! Testing utilities for syncset.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: in-memory local and remote backends wired to an identity
//! - **Generators**: proptest strategies for records and conflicts
//! - **Wrappers**: storage/remote/identity decorators that log or pause calls
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use syncset_testkit::generators::ConflictParams;
//!
//! proptest! {
//!     #[test]
//!     fn resolution_is_deterministic(params: ConflictParams) {
//!         let conflict = params.conflict();
//!         prop_assert_eq!(
//!             syncset_core::default_resolution(&[conflict.clone()], 0),
//!             syncset_core::default_resolution(&[conflict], 0),
//!         );
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use syncset_testkit::fixtures::TestFixture;
//!
//! async fn example() {
//!     let fixture = TestFixture::new();
//!     fixture.remote.write_from_other_device("settings", "theme", Some("light"));
//!
//!     let settings = fixture.open("settings").await;
//!     assert!(settings.synchronize().await.is_success());
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod wrappers;

pub use fixtures::TestFixture;
pub use generators::{ConflictParams, RecordParams};
pub use wrappers::{CountingIdentity, GatedRemote, RecordingStorage, StorageCall};
