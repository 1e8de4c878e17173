//! # Vellum Testkit
//!
//! Testing utilities for Vellum.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: temporary store files, keys, identities and the
//!   versioned `Record` schemas used by migration tests
//! - **Generators**: Proptest strategies for values, objects, schemas and
//!   permission records
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use vellum_testkit::generators::schema_and_object;
//!
//! proptest! {
//!     #[test]
//!     fn generated_objects_conform((schema, object) in schema_and_object()) {
//!         prop_assert!(schema.conform(&object).is_ok());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use vellum::Database;
//! use vellum_testkit::fixtures::{record_migration, record_schema_v3, TempStore};
//!
//! let temp = TempStore::new();
//! let db = Database::open(&temp.config().schema(record_schema_v3()).schema_version(3)).unwrap();
//! assert_eq!(db.schema_version(), 3);
//! # let _ = record_migration;
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    fixed_key, identity, permission_store, random_key, record_migration, record_schema_v3,
    record_schema_v4, record_schema_v5, store_with, unique_memory_id, TempStore, RECORD_TYPE,
};
pub use generators::{permission_record, schema_and_object, value};
