//! Process-wide registry of open stores.
//!
//! Every [`Database`](crate::Database) opened for the same location shares
//! one engine while any handle to it is alive. A second open with settings
//! that contradict the live engine fails with `MismatchedConfig`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use once_cell::sync::Lazy;
use tracing::{debug, info};
use vellum_core::{Schema, SyncIdentity};
use vellum_store::{MemoryStore, SqliteStore, Store, StoreKey, StoreOptions};

use crate::config::{StoreLocation, ValidatedDescriptor};
use crate::error::OpenError;
use crate::migration::{migrate, MigrationReport};

static ENGINES: Lazy<Mutex<HashMap<String, Slot>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Registry entry for one location.
#[derive(Default)]
struct Slot {
    engine: Weak<SharedEngine>,
    /// Held while the location is being opened and migrated.
    opening: Arc<Mutex<()>>,
}

impl Slot {
    fn is_idle(&self) -> bool {
        self.engine.strong_count() == 0 && Arc::strong_count(&self.opening) == 1
    }
}

fn engines() -> MutexGuard<'static, HashMap<String, Slot>> {
    ENGINES.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One open store and the settings it was opened with.
pub(crate) struct SharedEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) location: StoreLocation,
    pub(crate) read_only: bool,
    pub(crate) encryption_key: Option<StoreKey>,
    pub(crate) schema_version: u64,
    pub(crate) schema: Schema,
    pub(crate) report: MigrationReport,
    pub(crate) sync_identity: SyncIdentity,
}

impl Drop for SharedEngine {
    fn drop(&mut self) {
        debug!(location = %self.location, "closing store");
    }
}

/// The live engine for a location, if one is open.
pub(crate) fn live(location: &StoreLocation) -> Option<Arc<SharedEngine>> {
    engines()
        .get(&location.identity())
        .and_then(|slot| slot.engine.upgrade())
}

/// Open the store a descriptor names, or join the engine already open.
///
/// Opens of one location are serialized so only one of them migrates. The
/// registry itself is only locked for lookups, so a migration transform may
/// open other stores. Opening the location being migrated from inside its
/// own transform blocks forever.
pub(crate) fn acquire(descriptor: &ValidatedDescriptor) -> Result<Arc<SharedEngine>, OpenError> {
    let identity = descriptor.location.identity();

    let opening = {
        let mut engines = engines();
        let slot = engines.entry(identity.clone()).or_default();
        if let Some(engine) = slot.engine.upgrade() {
            check_compatible(&engine, descriptor)?;
            debug!(location = %identity, "joining open store");
            return Ok(engine);
        }
        Arc::clone(&slot.opening)
    };

    let _opening = opening.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    // Another thread may have finished opening while this one waited.
    if let Some(engine) = live(&descriptor.location) {
        check_compatible(&engine, descriptor)?;
        debug!(location = %identity, "joining open store");
        return Ok(engine);
    }

    let store = open_store(descriptor)?;
    let report = migrate(store.as_ref(), descriptor)?;
    info!(
        location = %identity,
        version = descriptor.schema_version,
        created = report.created,
        "opened store"
    );

    let engine = Arc::new(SharedEngine {
        store,
        location: descriptor.location.clone(),
        read_only: descriptor.read_only,
        encryption_key: descriptor.encryption_key.clone(),
        schema_version: descriptor.schema_version,
        schema: descriptor.schema.clone(),
        report,
        sync_identity: descriptor.sync_identity.clone(),
    });

    let mut engines = engines();
    engines.entry(identity).or_default().engine = Arc::downgrade(&engine);
    engines.retain(|_, slot| !slot.is_idle());
    Ok(engine)
}

fn open_store(descriptor: &ValidatedDescriptor) -> Result<Arc<dyn Store>, OpenError> {
    match &descriptor.location {
        StoreLocation::File(path) => {
            let mut options = StoreOptions::default().read_only(descriptor.read_only);
            if let Some(key) = &descriptor.encryption_key {
                options = options.encryption_key(key.clone());
            }
            Ok(Arc::new(SqliteStore::open_with(path, options)?))
        }
        StoreLocation::InMemory(_) => Ok(Arc::new(MemoryStore::new())),
    }
}

fn check_compatible(engine: &SharedEngine, descriptor: &ValidatedDescriptor) -> Result<(), OpenError> {
    if engine.read_only != descriptor.read_only {
        return Err(OpenError::MismatchedConfig(format!(
            "{} is open with read_only = {}",
            engine.location, engine.read_only
        )));
    }
    if engine.encryption_key != descriptor.encryption_key {
        return Err(OpenError::MismatchedConfig(format!(
            "{} is open with a different encryption key",
            engine.location
        )));
    }
    if engine.schema_version != descriptor.schema_version {
        return Err(OpenError::MismatchedConfig(format!(
            "{} is open at schema version {}, requested {}",
            engine.location, engine.schema_version, descriptor.schema_version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, Configuration};

    fn descriptor(config: Configuration) -> ValidatedDescriptor {
        resolve(&config.schema(Schema::empty())).unwrap()
    }

    #[test]
    fn test_same_location_shares_engine() {
        let config = Configuration::in_memory("coordinator-share").schema_version(1);
        let first = acquire(&descriptor(config.clone())).unwrap();
        let second = acquire(&descriptor(config)).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.report.created);
    }

    #[test]
    fn test_mismatched_version_rejected() {
        let first = acquire(&descriptor(
            Configuration::in_memory("coordinator-version").schema_version(1),
        ))
        .unwrap();

        let result = acquire(&descriptor(
            Configuration::in_memory("coordinator-version").schema_version(2),
        ));
        assert!(matches!(result, Err(OpenError::MismatchedConfig(_))));
        drop(first);
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let _first = acquire(&descriptor(Configuration::in_memory("coordinator-key"))).unwrap();

        let keyed = Configuration::in_memory("coordinator-key").encryption_key(vec![7u8; 64]);
        assert!(matches!(
            acquire(&descriptor(keyed)),
            Err(OpenError::MismatchedConfig(_))
        ));
    }

    #[test]
    fn test_engine_released_when_last_handle_drops() {
        let location = StoreLocation::InMemory("coordinator-release".into());
        let engine = acquire(&descriptor(Configuration::in_memory("coordinator-release"))).unwrap();
        assert!(live(&location).is_some());

        drop(engine);
        assert!(live(&location).is_none());

        // A fresh engine starts from an empty store.
        let reopened =
            acquire(&descriptor(Configuration::in_memory("coordinator-release"))).unwrap();
        assert!(reopened.report.created);
    }
}
