//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;
use tempfile::TempDir;
use vellum::{Configuration, Migration, MigrationError};
use vellum_core::{ObjectSchema, Property, PropertyType, Schema, SyncIdentity};
use vellum_perms::permission_schema;
use vellum_store::{MemoryStore, StoreError, StoreExt, KEY_LENGTH};

/// Object type used by the versioned record schemas.
pub const RECORD_TYPE: &str = "Record";

/// A store file in a temporary directory, removed on drop.
pub struct TempStore {
    _dir: TempDir,
    path: PathBuf,
}

impl TempStore {
    /// Create a fresh temporary directory. The store file does not exist yet.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("store.vellum");
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A configuration naming this store's file.
    pub fn config(&self) -> Configuration {
        Configuration::with_path(&self.path)
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-memory identifier no other test uses.
///
/// In-memory stores are shared per identifier across the process, so
/// tests running in parallel need distinct names.
pub fn unique_memory_id(prefix: &str) -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    format!("{}-{}", prefix, NEXT.fetch_add(1, Ordering::Relaxed))
}

/// A random encryption key of the required length.
pub fn random_key() -> Vec<u8> {
    let mut key = vec![0u8; KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// A deterministic encryption key filled with `byte`.
pub fn fixed_key(byte: u8) -> Vec<u8> {
    vec![byte; KEY_LENGTH]
}

/// A synchronized identity with a realm and a user.
pub fn identity() -> SyncIdentity {
    SyncIdentity::anonymous()
        .with_realm_url("realms://example.com/~/shared")
        .with_user_id("alice")
}

/// A memory store with `schema`'s object types already defined.
pub fn store_with(schema: &Schema) -> MemoryStore {
    let store = MemoryStore::new();
    store
        .write(|txn| {
            for object_type in schema.iter() {
                txn.put_object_type(object_type)?;
            }
            Ok::<_, StoreError>(())
        })
        .expect("failed to define object types");
    store
}

/// A memory store holding the permission object types.
pub fn permission_store() -> MemoryStore {
    store_with(&permission_schema())
}

/// `Record` at version 3: a single string field `A`.
pub fn record_schema_v3() -> Schema {
    Schema::new(vec![ObjectSchema::new(RECORD_TYPE)
        .property(Property::new("A", PropertyType::String))])
}

/// `Record` at version 4: `A` renamed to `B`.
pub fn record_schema_v4() -> Schema {
    Schema::new(vec![ObjectSchema::new(RECORD_TYPE)
        .property(Property::new("B", PropertyType::String))])
}

/// `Record` at version 5: `B` plus a required int field `C`.
pub fn record_schema_v5() -> Schema {
    Schema::new(vec![ObjectSchema::new(RECORD_TYPE)
        .property(Property::new("B", PropertyType::String))
        .property(Property::new("C", PropertyType::Int))])
}

/// Migrates `Record` one version at a time: 3 → 4 renames `A` to `B`,
/// 4 → 5 sets `C` to the length of `B`.
pub fn record_migration(
    old_version: u64,
    new_version: u64,
    migration: &mut Migration<'_>,
) -> Result<(), MigrationError> {
    for version in old_version..new_version {
        match version {
            3 => migration.rename_property(RECORD_TYPE, "A", "B")?,
            4 => migration.for_each(RECORD_TYPE, |record| {
                let length = record.get_str("B").map(str::len).unwrap_or_default();
                record.set("C", length as i64);
                Ok(())
            })?,
            other => {
                return Err(MigrationError::transform(format!(
                    "no migration step from version {}",
                    other
                )))
            }
        }
    }
    Ok(())
}
