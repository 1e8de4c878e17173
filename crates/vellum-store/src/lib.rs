//! # Vellum Store
//!
//! The storage engine for Vellum. Provides a trait-based transactional
//! interface over typed objects with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! A store holds object type definitions, objects of those types, index
//! rows and a schema version. All access goes through transactions:
//! readers see a consistent snapshot, and a single writer at a time makes
//! changes that become visible atomically on commit.
//!
//! ## Key Types
//!
//! - [`Store`] - Hands out read and write transactions
//! - [`ReadTransaction`] / [`WriteTransaction`] - Object access
//! - [`SqliteStore`] - SQLite-based persistent storage, optionally encrypted
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`CommitNotification`] - Published after every data-changing commit
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vellum_core::{Object, ObjectSchema, Property, PropertyType};
//! use vellum_store::{SqliteStore, StoreError, StoreExt, WriteTransaction};
//!
//! fn example() -> Result<(), StoreError> {
//!     let store = SqliteStore::open("app.vellum")?;
//!
//!     let person = ObjectSchema::new("Person")
//!         .property(Property::new("name", PropertyType::String))
//!         .primary_key("name");
//!
//!     store.write(|txn| {
//!         txn.put_object_type(&person)?;
//!         txn.insert("Person", Object::new().with("name", "Ada"))
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Conformance**: `insert` and `update` check objects against the stored type
//! - **Unique primary keys**: a taken primary key fails with `DuplicateKey`
//! - **Encryption at rest**: objects sealed with ChaCha20-Poly1305, index keys hashed
//! - **Rollback on drop**: an uncommitted write transaction leaves no trace

pub mod cipher;
pub mod error;
pub mod layout;
pub mod memory;
pub mod notify;
pub mod sqlite;
pub mod traits;

pub use cipher::{StoreKey, KEY_LENGTH};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use notify::CommitNotification;
pub use sqlite::{SqliteStore, StoreOptions};
pub use traits::{ReadTransaction, Store, StoreExt, WriteTransaction};
