//! # Vellum
//!
//! An embedded object database with versioned schemas, open-time migrations
//! and permission records for synchronized stores.
//!
//! ## Overview
//!
//! - **Configuration**: a plain value naming the store, its key and schema,
//!   validated by [`resolve`] before anything touches the disk
//! - **Migration**: on open, the stored schema version is compared with the
//!   requested one and a transform runs atomically when it increases
//! - **Permissions**: change, offer and request records whose status is
//!   decided by a remote authority
//!
//! ## Opening
//!
//! Opening a store follows one path:
//!
//! 1. The configuration is validated
//! 2. The process-wide coordinator returns the live engine for the
//!    location, or opens a new one
//! 3. A new engine runs the migrator, which either brings the store to the
//!    requested version or rejects the open
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vellum::{Configuration, Database};
//! use vellum::core::{Object, ObjectSchema, Property, PropertyType, Schema};
//!
//! fn example() -> vellum::Result<()> {
//!     let schema = Schema::new(vec![ObjectSchema::new("Note")
//!         .property(Property::new("body", PropertyType::String))]);
//!
//!     let config = Configuration::with_path("notes.vellum")
//!         .schema(schema)
//!         .schema_version(2)
//!         .migration(|_old, _new, migration| {
//!             migration.rename_property("Note", "text", "body")
//!         });
//!
//!     let db = Database::open(&config)?;
//!     db.write(|txn| txn.insert("Note", Object::new().with("body", "hello")))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! The component crates are re-exported:
//!
//! - `vellum::core` - Values, objects and schemas
//! - `vellum::store` - Storage engine and transactions
//! - `vellum::perms` - Permission records
//! - `vellum::sync` - Authority processing

pub mod config;
mod coordinator;
pub mod database;
pub mod error;
pub mod migration;

// Re-export component crates
pub use vellum_core as core;
pub use vellum_perms as perms;
pub use vellum_store as store;
pub use vellum_sync as sync;

// Re-export main types for convenience
pub use config::{
    default_path, register_object_type, registered_schema, resolve, set_default_path,
    Configuration, MigrationTransform, StoreLocation, ValidatedDescriptor, DEFAULT_FILE_NAME,
};
pub use database::{schema_version_at, Database};
pub use error::{ConfigError, MigrationError, OpenError, Result, VellumError};
pub use migration::{Migration, MigrationReport, MigrationState};

pub use vellum_core::{Object, ObjectKey, ObjectSchema, Property, PropertyType, Schema, SyncIdentity, Value};
pub use vellum_perms::{
    PermissionChange, PermissionKind, PermissionOffer, PermissionRecord, PermissionRequest,
    PermissionStatus, PermissionStore,
};
