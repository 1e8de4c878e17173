//! Store traits: the abstract interface of the storage engine.
//!
//! Backends implement a small set of low-level operations (definitions,
//! raw object rows, index rows). Schema conformance, primary key
//! uniqueness and index maintenance are provided methods on top of them, so
//! every backend enforces the same rules.

use tokio::sync::broadcast;
use tracing::warn;
use vellum_core::{Object, ObjectKey, ObjectSchema, Schema, Value};

use crate::error::{Result, StoreError};
use crate::notify::CommitNotification;

/// Read access to a consistent snapshot of a store.
pub trait ReadTransaction {
    // ─────────────────────────────────────────────────────────────────────────
    // Backend operations
    // ─────────────────────────────────────────────────────────────────────────

    /// The stored schema version, `None` for a store never versioned.
    fn schema_version(&self) -> Result<Option<u64>>;

    /// Every stored object type definition.
    fn object_types(&self) -> Result<Schema>;

    /// One stored object type definition.
    fn object_type(&self, name: &str) -> Result<Option<ObjectSchema>>;

    /// Get an object by key.
    fn get(&self, object_type: &str, key: ObjectKey) -> Result<Option<Object>>;

    /// Every object of a type, ordered by key.
    fn scan(&self, object_type: &str) -> Result<Vec<(ObjectKey, Object)>>;

    /// The lookup key stored in index rows for `value`.
    fn index_key(&self, value: &Value) -> Vec<u8>;

    /// Object keys recorded under an index entry.
    fn lookup_index(
        &self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
    ) -> Result<Vec<ObjectKey>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Provided
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of objects of a type.
    fn count(&self, object_type: &str) -> Result<usize> {
        Ok(self.scan(object_type)?.len())
    }

    /// A stored definition, or `UnknownObjectType`.
    fn require_object_type(&self, name: &str) -> Result<ObjectSchema> {
        self.object_type(name)?
            .ok_or_else(|| StoreError::UnknownObjectType(name.to_string()))
    }

    /// Find the object whose primary key equals `value`.
    fn find_by_primary_key(
        &self,
        object_type: &str,
        value: &Value,
    ) -> Result<Option<(ObjectKey, Object)>> {
        let schema = self.require_object_type(object_type)?;
        let pk = schema
            .primary_key
            .as_deref()
            .ok_or_else(|| StoreError::NoPrimaryKey(object_type.to_string()))?;

        let keys = self.lookup_index(object_type, pk, &self.index_key(value))?;
        match keys.first() {
            Some(&key) => Ok(self.get(object_type, key)?.map(|object| (key, object))),
            None => Ok(None),
        }
    }

    /// Find every object whose indexed `property` equals `value`.
    fn find_by_index(
        &self,
        object_type: &str,
        property: &str,
        value: &Value,
    ) -> Result<Vec<(ObjectKey, Object)>> {
        let schema = self.require_object_type(object_type)?;
        let indexed = schema
            .property_named(property)
            .map(|p| p.indexed || schema.primary_key.as_deref() == Some(property))
            .unwrap_or(false);
        if !indexed {
            return Err(StoreError::NotIndexed {
                object_type: object_type.to_string(),
                property: property.to_string(),
            });
        }

        let mut found = Vec::new();
        for key in self.lookup_index(object_type, property, &self.index_key(value))? {
            if let Some(object) = self.get(object_type, key)? {
                found.push((key, object));
            }
        }
        Ok(found)
    }
}

/// Exclusive write access to a store.
///
/// Nothing is visible to readers until [`commit`](Self::commit). Dropping a
/// transaction without committing rolls it back.
pub trait WriteTransaction: ReadTransaction {
    // ─────────────────────────────────────────────────────────────────────────
    // Backend operations
    // ─────────────────────────────────────────────────────────────────────────

    fn set_schema_version(&mut self, version: u64) -> Result<()>;

    /// Create or replace a type definition. Stored objects are untouched.
    fn put_object_type(&mut self, schema: &ObjectSchema) -> Result<()>;

    /// Remove a type definition together with its objects and index rows.
    fn remove_object_type(&mut self, name: &str) -> Result<()>;

    /// Reserve the next object key of a type.
    fn allocate_key(&mut self, object_type: &str) -> Result<ObjectKey>;

    /// Write an object row as-is.
    fn put_object(&mut self, object_type: &str, key: ObjectKey, object: &Object) -> Result<()>;

    /// Remove an object row. Returns whether it existed.
    fn remove_object(&mut self, object_type: &str, key: ObjectKey) -> Result<bool>;

    fn add_index_entry(
        &mut self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
        key: ObjectKey,
    ) -> Result<()>;

    /// Remove every index row pointing at an object.
    fn remove_index_entries(&mut self, object_type: &str, key: ObjectKey) -> Result<()>;

    /// Remove every index row of a type.
    fn clear_index(&mut self, object_type: &str) -> Result<()>;

    /// Remove every object, type definition and the schema version.
    fn clear(&mut self) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Provided
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new object, conformed to its stored type.
    ///
    /// Fails with `DuplicateKey` when the primary key is taken.
    fn insert(&mut self, object_type: &str, object: Object) -> Result<ObjectKey> {
        let schema = self.require_object_type(object_type)?;
        let object = schema.conform(&object)?;
        self.check_unique(&schema, &object, None)?;

        let key = self.allocate_key(object_type)?;
        self.put_object(object_type, key, &object)?;
        self.index_object(&schema, key, &object)?;
        Ok(key)
    }

    /// Replace an existing object.
    fn update(&mut self, object_type: &str, key: ObjectKey, object: Object) -> Result<()> {
        let schema = self.require_object_type(object_type)?;
        if self.get(object_type, key)?.is_none() {
            return Err(StoreError::NotFound {
                object_type: object_type.to_string(),
                key,
            });
        }

        let object = schema.conform(&object)?;
        self.check_unique(&schema, &object, Some(key))?;
        self.put_object(object_type, key, &object)?;
        self.remove_index_entries(object_type, key)?;
        self.index_object(&schema, key, &object)
    }

    /// Delete an object. Returns whether it existed.
    fn delete(&mut self, object_type: &str, key: ObjectKey) -> Result<bool> {
        self.remove_index_entries(object_type, key)?;
        self.remove_object(object_type, key)
    }

    /// Insert without conformance or index maintenance.
    ///
    /// Only for migrations, which call [`reindex`](Self::reindex) afterwards.
    fn insert_unchecked(&mut self, object_type: &str, object: &Object) -> Result<ObjectKey> {
        let key = self.allocate_key(object_type)?;
        self.put_object(object_type, key, object)?;
        Ok(key)
    }

    /// Rebuild every index row of a type from its stored definition.
    fn reindex(&mut self, object_type: &str) -> Result<()> {
        let schema = self.require_object_type(object_type)?;
        self.clear_index(object_type)?;
        for (key, object) in self.scan(object_type)? {
            self.check_unique(&schema, &object, Some(key))?;
            self.index_object(&schema, key, &object)?;
        }
        Ok(())
    }

    /// Fail if another object already holds this object's primary key.
    fn check_unique(
        &self,
        schema: &ObjectSchema,
        object: &Object,
        exclude: Option<ObjectKey>,
    ) -> Result<()> {
        let (Some(pk), Some(value)) = (schema.primary_key.as_deref(), schema.primary_key_of(object))
        else {
            return Ok(());
        };

        let taken = self
            .lookup_index(&schema.name, pk, &self.index_key(value))?
            .into_iter()
            .any(|existing| Some(existing) != exclude);
        if taken {
            return Err(StoreError::DuplicateKey {
                object_type: schema.name.clone(),
                key: value.to_string(),
            });
        }
        Ok(())
    }

    /// Write the primary key row and secondary index rows of an object.
    fn index_object(&mut self, schema: &ObjectSchema, key: ObjectKey, object: &Object) -> Result<()> {
        if let (Some(pk), Some(value)) = (schema.primary_key.as_deref(), schema.primary_key_of(object)) {
            let index_key = self.index_key(value);
            self.add_index_entry(&schema.name, pk, &index_key, key)?;
        }

        for property in schema.indexed_properties() {
            if schema.primary_key.as_deref() == Some(property.name.as_str()) {
                continue;
            }
            let value = object.get(&property.name).cloned().unwrap_or(Value::Null);
            let index_key = self.index_key(&value);
            self.add_index_entry(&schema.name, &property.name, &index_key, key)?;
        }
        Ok(())
    }
}

/// The storage engine: hands out transactions over one store.
///
/// Single writer, multiple readers. `begin_write` blocks until any other
/// write transaction on the same store has finished.
pub trait Store: Send + Sync {
    /// Start a read transaction over a consistent snapshot.
    fn begin_read(&self) -> Result<Box<dyn ReadTransaction + '_>>;

    /// Start an exclusive write transaction.
    ///
    /// Fails with `ReadOnly` on read-only stores.
    fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>>;

    /// Subscribe to commit notifications.
    ///
    /// One notification is sent for every commit that changed objects or
    /// type definitions.
    fn subscribe(&self) -> broadcast::Receiver<CommitNotification>;

    fn is_read_only(&self) -> bool;

    /// Reclaim unused space.
    fn compact(&self) -> Result<()>;
}

/// Closure-scoped transactions.
pub trait StoreExt: Store {
    /// Run `f` against a read snapshot.
    fn read<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&dyn ReadTransaction) -> std::result::Result<T, E>,
    {
        let txn = self.begin_read()?;
        f(&*txn)
    }

    /// Run `f` in a write transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    fn write<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut dyn WriteTransaction) -> std::result::Result<T, E>,
    {
        let mut txn = self.begin_write()?;
        match f(&mut *txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = txn.rollback() {
                    warn!("rollback failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
