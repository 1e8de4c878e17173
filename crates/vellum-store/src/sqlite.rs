//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for Vellum. It uses rusqlite with
//! bundled SQLite. One connection per store, guarded by a mutex, gives the
//! single-writer model; `BEGIN IMMEDIATE` serializes writers across
//! processes sharing a file.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use vellum_core::{Object, ObjectKey, ObjectSchema, Schema, Value};

use crate::cipher::{Cipher, StoreKey};
use crate::error::{Result, StoreError};
use crate::layout::{self, KEY_CHECK_KEY, SCHEMA_VERSION_KEY};
use crate::notify::{CommitNotification, Notifier};
use crate::traits::{ReadTransaction, Store, WriteTransaction};

/// How long a writer waits for another process's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for opening a [`SqliteStore`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Open without write access. The store must already be initialized.
    pub read_only: bool,
    /// Encrypt objects at rest with this key.
    pub encryption_key: Option<StoreKey>,
}

impl StoreOptions {
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn encryption_key(mut self, key: StoreKey) -> Self {
        self.encryption_key = Some(key);
        self
    }
}

/// SQLite-based store implementation.
///
/// Thread-safe via an internal mutex around the connection.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Mutex<Connection>,
    cipher: Option<Cipher>,
    read_only: bool,
    notifier: Notifier,
}

impl SqliteStore {
    /// Open a SQLite store at the given path.
    ///
    /// Creates the file and the engine tables if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    /// Open a SQLite store with explicit options.
    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let conn = if options.read_only {
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            Connection::open(path)?
        };
        Self::init(conn, options)
    }

    /// Open a private in-memory SQLite store.
    pub fn open_memory() -> Result<Self> {
        Self::open_memory_with(StoreOptions::default())
    }

    /// Open a private in-memory SQLite store with explicit options.
    ///
    /// A read-only in-memory store could never hold data and is rejected.
    pub fn open_memory_with(options: StoreOptions) -> Result<Self> {
        if options.read_only {
            return Err(StoreError::Uninitialized);
        }
        Self::init(Connection::open_in_memory()?, options)
    }

    fn init(mut conn: Connection, options: StoreOptions) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if options.read_only {
            layout::verify(&conn)?;
        } else {
            layout::migrate(&mut conn)?;
        }

        let cipher = options.encryption_key.as_ref().map(Cipher::new);
        verify_key(&conn, cipher.as_ref(), options.read_only)?;

        debug!(
            read_only = options.read_only,
            encrypted = cipher.is_some(),
            "opened sqlite store"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
            read_only: options.read_only,
            notifier: Notifier::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

/// Check the encryption key against the value recorded in the store.
///
/// A store that was created without a key stays unencrypted and vice versa.
fn verify_key(conn: &Connection, cipher: Option<&Cipher>, read_only: bool) -> Result<()> {
    let stored: Option<Vec<u8>> = conn
        .query_row(
            "SELECT value FROM vellum_metadata WHERE key = ?1",
            params![KEY_CHECK_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match (stored, cipher) {
        (None, None) => Ok(()),
        (Some(stored), Some(cipher)) if stored.as_slice() == cipher.check_value() => Ok(()),
        (Some(_), Some(_)) => Err(StoreError::InvalidKey(
            "encryption key does not match this store".into(),
        )),
        (Some(_), None) => Err(StoreError::InvalidKey(
            "store is encrypted; an encryption key is required".into(),
        )),
        (None, Some(cipher)) => {
            let has_data: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM vellum_object_types)
                     OR EXISTS(SELECT 1 FROM vellum_metadata WHERE key = ?1)",
                params![SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )?;
            if has_data || read_only {
                return Err(StoreError::InvalidKey(
                    "store is not encrypted".into(),
                ));
            }
            conn.execute(
                "INSERT INTO vellum_metadata (key, value) VALUES (?1, ?2)",
                params![KEY_CHECK_KEY, cipher.check_value().as_slice()],
            )?;
            Ok(())
        }
    }
}

fn parse_definition(json: &str) -> Result<ObjectSchema> {
    serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Read queries shared by read and write transactions.
struct Reader<'c> {
    conn: &'c Connection,
    cipher: Option<&'c Cipher>,
}

impl Reader<'_> {
    fn decode(&self, data: &[u8]) -> Result<Object> {
        match self.cipher {
            Some(cipher) => Ok(Object::from_bytes(&cipher.open(data)?)?),
            None => Ok(Object::from_bytes(data)?),
        }
    }

    fn schema_version(&self) -> Result<Option<u64>> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT value FROM vellum_metadata WHERE key = ?1",
                params![SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.map(|v| v as u64))
    }

    fn object_types(&self) -> Result<Schema> {
        let mut stmt = self
            .conn
            .prepare("SELECT definition FROM vellum_object_types ORDER BY name")?;
        let definitions = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        definitions
            .iter()
            .map(|json| parse_definition(json))
            .collect()
    }

    fn object_type(&self, name: &str) -> Result<Option<ObjectSchema>> {
        let definition: Option<String> = self
            .conn
            .query_row(
                "SELECT definition FROM vellum_object_types WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        definition.as_deref().map(parse_definition).transpose()
    }

    fn get(&self, object_type: &str, key: ObjectKey) -> Result<Option<Object>> {
        let data: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT data FROM vellum_objects WHERE object_type = ?1 AND object_key = ?2",
                params![object_type, key.get() as i64],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| self.decode(&d)).transpose()
    }

    fn scan(&self, object_type: &str) -> Result<Vec<(ObjectKey, Object)>> {
        let mut stmt = self.conn.prepare(
            "SELECT object_key, data FROM vellum_objects
             WHERE object_type = ?1 ORDER BY object_key",
        )?;
        let rows = stmt
            .query_map(params![object_type], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(key, data)| Ok((ObjectKey::new(key as u64), self.decode(&data)?)))
            .collect()
    }

    fn count(&self, object_type: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM vellum_objects WHERE object_type = ?1",
            params![object_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn index_key(&self, value: &Value) -> Vec<u8> {
        let raw = value.index_bytes();
        match self.cipher {
            Some(cipher) => cipher.index_key(&raw),
            None => raw,
        }
    }

    fn lookup_index(
        &self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
    ) -> Result<Vec<ObjectKey>> {
        let mut stmt = self.conn.prepare(
            "SELECT object_key FROM vellum_index
             WHERE object_type = ?1 AND property = ?2 AND index_key = ?3
             ORDER BY object_key",
        )?;
        let keys = stmt
            .query_map(params![object_type, property, index_key], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys.into_iter().map(|k| ObjectKey::new(k as u64)).collect())
    }
}

struct SqliteReadTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    cipher: Option<&'a Cipher>,
}

impl SqliteReadTxn<'_> {
    fn reader(&self) -> Reader<'_> {
        Reader {
            conn: &self.conn,
            cipher: self.cipher,
        }
    }
}

impl Drop for SqliteReadTxn<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            warn!("failed to end read transaction: {}", e);
        }
    }
}

impl ReadTransaction for SqliteReadTxn<'_> {
    fn schema_version(&self) -> Result<Option<u64>> {
        self.reader().schema_version()
    }

    fn object_types(&self) -> Result<Schema> {
        self.reader().object_types()
    }

    fn object_type(&self, name: &str) -> Result<Option<ObjectSchema>> {
        self.reader().object_type(name)
    }

    fn get(&self, object_type: &str, key: ObjectKey) -> Result<Option<Object>> {
        self.reader().get(object_type, key)
    }

    fn scan(&self, object_type: &str) -> Result<Vec<(ObjectKey, Object)>> {
        self.reader().scan(object_type)
    }

    fn count(&self, object_type: &str) -> Result<usize> {
        self.reader().count(object_type)
    }

    fn index_key(&self, value: &Value) -> Vec<u8> {
        self.reader().index_key(value)
    }

    fn lookup_index(
        &self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
    ) -> Result<Vec<ObjectKey>> {
        self.reader().lookup_index(object_type, property, index_key)
    }
}

struct SqliteWriteTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    store: &'a SqliteStore,
    /// Object types touched, published on commit.
    changed: BTreeSet<String>,
    finished: bool,
}

impl SqliteWriteTxn<'_> {
    fn reader(&self) -> Reader<'_> {
        Reader {
            conn: &self.conn,
            cipher: self.store.cipher.as_ref(),
        }
    }

    fn encode(&self, object: &Object) -> Result<Vec<u8>> {
        let bytes = object.to_bytes()?;
        match &self.store.cipher {
            Some(cipher) => cipher.seal(&bytes),
            None => Ok(bytes),
        }
    }
}

impl Drop for SqliteWriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("failed to roll back abandoned write transaction: {}", e);
            }
        }
    }
}

impl ReadTransaction for SqliteWriteTxn<'_> {
    fn schema_version(&self) -> Result<Option<u64>> {
        self.reader().schema_version()
    }

    fn object_types(&self) -> Result<Schema> {
        self.reader().object_types()
    }

    fn object_type(&self, name: &str) -> Result<Option<ObjectSchema>> {
        self.reader().object_type(name)
    }

    fn get(&self, object_type: &str, key: ObjectKey) -> Result<Option<Object>> {
        self.reader().get(object_type, key)
    }

    fn scan(&self, object_type: &str) -> Result<Vec<(ObjectKey, Object)>> {
        self.reader().scan(object_type)
    }

    fn count(&self, object_type: &str) -> Result<usize> {
        self.reader().count(object_type)
    }

    fn index_key(&self, value: &Value) -> Vec<u8> {
        self.reader().index_key(value)
    }

    fn lookup_index(
        &self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
    ) -> Result<Vec<ObjectKey>> {
        self.reader().lookup_index(object_type, property, index_key)
    }
}

impl WriteTransaction for SqliteWriteTxn<'_> {
    fn set_schema_version(&mut self, version: u64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO vellum_metadata (key, value) VALUES (?1, ?2)",
            params![SCHEMA_VERSION_KEY, version as i64],
        )?;
        Ok(())
    }

    fn put_object_type(&mut self, schema: &ObjectSchema) -> Result<()> {
        let definition =
            serde_json::to_string(schema).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO vellum_object_types (name, definition) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET definition = excluded.definition",
            params![schema.name, definition],
        )?;
        self.changed.insert(schema.name.clone());
        Ok(())
    }

    fn remove_object_type(&mut self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM vellum_index WHERE object_type = ?1", params![name])?;
        self.conn
            .execute("DELETE FROM vellum_objects WHERE object_type = ?1", params![name])?;
        self.conn
            .execute("DELETE FROM vellum_object_types WHERE name = ?1", params![name])?;
        self.changed.insert(name.to_string());
        Ok(())
    }

    fn allocate_key(&mut self, object_type: &str) -> Result<ObjectKey> {
        let next: Option<i64> = self
            .conn
            .query_row(
                "SELECT next_key FROM vellum_object_types WHERE name = ?1",
                params![object_type],
                |row| row.get(0),
            )
            .optional()?;
        let next = next.ok_or_else(|| StoreError::UnknownObjectType(object_type.to_string()))?;

        self.conn.execute(
            "UPDATE vellum_object_types SET next_key = ?2 WHERE name = ?1",
            params![object_type, next + 1],
        )?;
        Ok(ObjectKey::new(next as u64))
    }

    fn put_object(&mut self, object_type: &str, key: ObjectKey, object: &Object) -> Result<()> {
        let data = self.encode(object)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO vellum_objects (object_type, object_key, data)
             VALUES (?1, ?2, ?3)",
            params![object_type, key.get() as i64, data],
        )?;
        self.changed.insert(object_type.to_string());
        Ok(())
    }

    fn remove_object(&mut self, object_type: &str, key: ObjectKey) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM vellum_objects WHERE object_type = ?1 AND object_key = ?2",
            params![object_type, key.get() as i64],
        )?;
        if removed > 0 {
            self.changed.insert(object_type.to_string());
        }
        Ok(removed > 0)
    }

    fn add_index_entry(
        &mut self,
        object_type: &str,
        property: &str,
        index_key: &[u8],
        key: ObjectKey,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO vellum_index (object_type, property, index_key, object_key)
             VALUES (?1, ?2, ?3, ?4)",
            params![object_type, property, index_key, key.get() as i64],
        )?;
        Ok(())
    }

    fn remove_index_entries(&mut self, object_type: &str, key: ObjectKey) -> Result<()> {
        self.conn.execute(
            "DELETE FROM vellum_index WHERE object_type = ?1 AND object_key = ?2",
            params![object_type, key.get() as i64],
        )?;
        Ok(())
    }

    fn clear_index(&mut self, object_type: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM vellum_index WHERE object_type = ?1",
            params![object_type],
        )?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let names = self.reader().object_types()?;
        self.changed.extend(names.names().map(String::from));

        self.conn.execute_batch(
            "DELETE FROM vellum_index;
             DELETE FROM vellum_objects;
             DELETE FROM vellum_object_types;",
        )?;
        self.conn.execute(
            "DELETE FROM vellum_metadata WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
        )?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.conn.execute_batch("COMMIT")?;
        this.finished = true;

        let store = this.store;
        let changed = std::mem::take(&mut this.changed);
        // Release the connection before waking observers.
        drop(this);
        store.notifier.publish(changed);
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.finished = true;
        this.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn begin_read(&self) -> Result<Box<dyn ReadTransaction + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Box::new(SqliteReadTxn {
            conn,
            cipher: self.cipher.as_ref(),
        }))
    }

    fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteWriteTxn {
            conn,
            store: self,
            changed: BTreeSet::new(),
            finished: false,
        }))
    }

    fn subscribe(&self) -> broadcast::Receiver<CommitNotification> {
        self.notifier.subscribe()
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn compact(&self) -> Result<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.lock()?.execute_batch("VACUUM")?;
        Ok(())
    }
}
