//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence. Readers see an
//! immutable snapshot; a writer works on a private copy that replaces the
//! snapshot on commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::broadcast;
use vellum_core::{Object, ObjectKey, ObjectSchema, Schema, Value};

use crate::error::{Result, StoreError};
use crate::notify::{CommitNotification, Notifier};
use crate::traits::{ReadTransaction, Store, WriteTransaction};

/// Index entry address: (object type, property, index key).
type IndexAddress = (String, String, Vec<u8>);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    schema_version: Option<u64>,
    object_types: BTreeMap<String, ObjectSchema>,
    next_keys: BTreeMap<String, u64>,
    objects: BTreeMap<String, BTreeMap<ObjectKey, Object>>,
    index: BTreeMap<IndexAddress, BTreeSet<ObjectKey>>,
}

impl MemoryState {
    fn get(&self, object_type: &str, key: ObjectKey) -> Option<Object> {
        self.objects
            .get(object_type)
            .and_then(|objects| objects.get(&key))
            .cloned()
    }

    fn scan(&self, object_type: &str) -> Vec<(ObjectKey, Object)> {
        self.objects
            .get(object_type)
            .map(|objects| objects.iter().map(|(k, o)| (*k, o.clone())).collect())
            .unwrap_or_default()
    }

    fn lookup(&self, object_type: &str, property: &str, index_key: &[u8]) -> Vec<ObjectKey> {
        let address = (object_type.to_string(), property.to_string(), index_key.to_vec());
        self.index
            .get(&address)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// In-memory store implementation.
///
/// All data is lost when the store is dropped.
pub struct MemoryStore {
    committed: RwLock<Arc<MemoryState>>,
    /// Held by the active write transaction.
    writer: Mutex<()>,
    notifier: Notifier,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(Arc::new(MemoryState::default())),
            writer: Mutex::new(()),
            notifier: Notifier::new(),
        }
    }

    fn snapshot(&self) -> Result<Arc<MemoryState>> {
        self.committed
            .read()
            .map(|state| Arc::clone(&state))
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryReadTxn {
    state: Arc<MemoryState>,
}

impl ReadTransaction for MemoryReadTxn {
    fn schema_version(&self) -> Result<Option<u64>> {
        Ok(self.state.schema_version)
    }

    fn object_types(&self) -> Result<Schema> {
        Ok(self.state.object_types.values().cloned().collect())
    }

    fn object_type(&self, name: &str) -> Result<Option<ObjectSchema>> {
        Ok(self.state.object_types.get(name).cloned())
    }

    fn get(&self, object_type: &str, key: ObjectKey) -> Result<Option<Object>> {
        Ok(self.state.get(object_type, key))
    }

    fn scan(&self, object_type: &str) -> Result<Vec<(ObjectKey, Object)>> {
        Ok(self.state.scan(object_type))
    }

    fn index_key(&self, value: &Value) -> Vec<u8> {
        value.index_bytes()
    }

    fn lookup_index(
        &self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
    ) -> Result<Vec<ObjectKey>> {
        Ok(self.state.lookup(object_type, property, index_key))
    }
}

struct MemoryWriteTxn<'a> {
    _guard: MutexGuard<'a, ()>,
    store: &'a MemoryStore,
    state: MemoryState,
    changed: BTreeSet<String>,
}

impl ReadTransaction for MemoryWriteTxn<'_> {
    fn schema_version(&self) -> Result<Option<u64>> {
        Ok(self.state.schema_version)
    }

    fn object_types(&self) -> Result<Schema> {
        Ok(self.state.object_types.values().cloned().collect())
    }

    fn object_type(&self, name: &str) -> Result<Option<ObjectSchema>> {
        Ok(self.state.object_types.get(name).cloned())
    }

    fn get(&self, object_type: &str, key: ObjectKey) -> Result<Option<Object>> {
        Ok(self.state.get(object_type, key))
    }

    fn scan(&self, object_type: &str) -> Result<Vec<(ObjectKey, Object)>> {
        Ok(self.state.scan(object_type))
    }

    fn index_key(&self, value: &Value) -> Vec<u8> {
        value.index_bytes()
    }

    fn lookup_index(
        &self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
    ) -> Result<Vec<ObjectKey>> {
        Ok(self.state.lookup(object_type, property, index_key))
    }
}

impl WriteTransaction for MemoryWriteTxn<'_> {
    fn set_schema_version(&mut self, version: u64) -> Result<()> {
        self.state.schema_version = Some(version);
        Ok(())
    }

    fn put_object_type(&mut self, schema: &ObjectSchema) -> Result<()> {
        self.state
            .object_types
            .insert(schema.name.clone(), schema.clone());
        self.state.next_keys.entry(schema.name.clone()).or_insert(1);
        self.changed.insert(schema.name.clone());
        Ok(())
    }

    fn remove_object_type(&mut self, name: &str) -> Result<()> {
        self.clear_index(name)?;
        self.state.objects.remove(name);
        self.state.object_types.remove(name);
        self.state.next_keys.remove(name);
        self.changed.insert(name.to_string());
        Ok(())
    }

    fn allocate_key(&mut self, object_type: &str) -> Result<ObjectKey> {
        let next = self
            .state
            .next_keys
            .get_mut(object_type)
            .ok_or_else(|| StoreError::UnknownObjectType(object_type.to_string()))?;
        let key = ObjectKey::new(*next);
        *next += 1;
        Ok(key)
    }

    fn put_object(&mut self, object_type: &str, key: ObjectKey, object: &Object) -> Result<()> {
        self.state
            .objects
            .entry(object_type.to_string())
            .or_default()
            .insert(key, object.clone());
        self.changed.insert(object_type.to_string());
        Ok(())
    }

    fn remove_object(&mut self, object_type: &str, key: ObjectKey) -> Result<bool> {
        let removed = self
            .state
            .objects
            .get_mut(object_type)
            .and_then(|objects| objects.remove(&key))
            .is_some();
        if removed {
            self.changed.insert(object_type.to_string());
        }
        Ok(removed)
    }

    fn add_index_entry(
        &mut self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
        key: ObjectKey,
    ) -> Result<()> {
        self.state
            .index
            .entry((object_type.to_string(), property.to_string(), index_key.to_vec()))
            .or_default()
            .insert(key);
        Ok(())
    }

    fn remove_index_entries(&mut self, object_type: &str, key: ObjectKey) -> Result<()> {
        self.state.index.retain(|(t, _, _), keys| {
            if t == object_type {
                keys.remove(&key);
            }
            !keys.is_empty()
        });
        Ok(())
    }

    fn clear_index(&mut self, object_type: &str) -> Result<()> {
        self.state.index.retain(|(t, _, _), _| t != object_type);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.changed
            .extend(self.state.object_types.keys().cloned());
        self.state = MemoryState::default();
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let MemoryWriteTxn {
            _guard: guard,
            store,
            state,
            changed,
        } = *self;

        *store
            .committed
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))? = Arc::new(state);
        drop(guard);
        store.notifier.publish(changed);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Store for MemoryStore {
    fn begin_read(&self) -> Result<Box<dyn ReadTransaction + '_>> {
        Ok(Box::new(MemoryReadTxn {
            state: self.snapshot()?,
        }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>> {
        let guard = self
            .writer
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        let state = MemoryState::clone(&*self.snapshot()?);
        Ok(Box::new(MemoryWriteTxn {
            _guard: guard,
            store: self,
            state,
            changed: BTreeSet::new(),
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<CommitNotification> {
        self.notifier.subscribe()
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn compact(&self) -> Result<()> {
        Ok(())
    }
}
