//! The database handle.

use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;
use vellum_core::{Schema, SyncIdentity};
use vellum_perms::IdentityContext;
use vellum_store::{
    CommitNotification, ReadTransaction, SqliteStore, Store, StoreError, StoreExt, StoreOptions,
    WriteTransaction,
};

use crate::config::{resolve, Configuration, StoreLocation};
use crate::coordinator::{self, SharedEngine};
use crate::error::OpenError;
use crate::migration::{stored_version, MigrationReport};

/// An open store.
///
/// Cheap to clone. Handles opened for the same location share one engine,
/// which closes when the last handle is dropped.
#[derive(Clone)]
pub struct Database {
    engine: Arc<SharedEngine>,
}

impl Database {
    /// Validate `config`, open its store and bring it to the requested
    /// schema version.
    pub fn open(config: &Configuration) -> Result<Self, OpenError> {
        let descriptor = resolve(config)?;
        let engine = coordinator::acquire(&descriptor)?;
        Ok(Self { engine })
    }

    /// Open with the process-wide default configuration.
    pub fn open_default() -> Result<Self, OpenError> {
        Self::open(&Configuration::default_configuration())
    }

    /// [`open`](Self::open) on the blocking pool.
    ///
    /// Migrations can take a while; this keeps them off the async workers.
    pub async fn open_async(config: Configuration) -> Result<Self, OpenError> {
        tokio::task::spawn_blocking(move || Self::open(&config))
            .await
            .map_err(|e| OpenError::Task(e.to_string()))?
    }

    /// Run `f` against a read snapshot.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&dyn ReadTransaction) -> Result<T, E>,
    {
        self.engine.store.read(f)
    }

    /// Run `f` in a write transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&mut dyn WriteTransaction) -> Result<T, E>,
    {
        self.engine.store.write(f)
    }

    /// Subscribe to commit notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitNotification> {
        self.engine.store.subscribe()
    }

    /// Reclaim unused space.
    pub fn compact(&self) -> Result<(), StoreError> {
        self.engine.store.compact()
    }

    pub fn schema_version(&self) -> u64 {
        self.engine.schema_version
    }

    /// The schema this database was opened with.
    pub fn schema(&self) -> &Schema {
        &self.engine.schema
    }

    pub fn sync_identity(&self) -> &SyncIdentity {
        &self.engine.sync_identity
    }

    /// What happened when the underlying store was opened.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.engine.report
    }

    pub fn location(&self) -> &StoreLocation {
        &self.engine.location
    }

    pub fn is_read_only(&self) -> bool {
        self.engine.read_only
    }

    /// The underlying store, for components that drive it directly.
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.engine.store)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.engine.location)
            .field("schema_version", &self.engine.schema_version)
            .field("read_only", &self.engine.read_only)
            .finish()
    }
}

impl IdentityContext for Database {
    fn realm_url(&self) -> Option<&str> {
        self.engine.sync_identity.realm_url()
    }

    fn user_id(&self) -> Option<&str> {
        self.engine.sync_identity.user_id()
    }
}

/// The schema version stored at a configuration's location, without
/// opening it for use.
///
/// `None` when nothing has been stored there yet.
pub fn schema_version_at(config: &Configuration) -> Result<Option<u64>, OpenError> {
    let descriptor = resolve(config)?;

    if let Some(engine) = coordinator::live(&descriptor.location) {
        return Ok(engine.store.read(stored_version)?);
    }

    let path = match &descriptor.location {
        StoreLocation::InMemory(_) => return Ok(None),
        StoreLocation::File(path) if !path.exists() => return Ok(None),
        StoreLocation::File(path) => path,
    };

    let mut options = StoreOptions::default().read_only(true);
    if let Some(key) = descriptor.encryption_key {
        options = options.encryption_key(key);
    }
    match SqliteStore::open_with(path, options) {
        Ok(store) => store.read(stored_version),
        Err(StoreError::Uninitialized) => {
            debug!(location = %descriptor.location, "store has no engine tables");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
