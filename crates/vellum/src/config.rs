//! Database configuration and its validation.
//!
//! A [`Configuration`] is a plain value that describes which store to open
//! and how. [`resolve`] checks it without touching the file system and
//! produces a [`ValidatedDescriptor`], which is what the opener consumes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use vellum_core::{ObjectSchema, Schema, SchemaRegistry, SyncIdentity};
use vellum_store::{StoreKey, KEY_LENGTH};

use crate::error::{ConfigError, MigrationError};
use crate::migration::Migration;

/// Rewrites stored objects when the schema version increases.
///
/// Called once with the stored and the requested version. Returning an
/// error aborts the open and leaves the store untouched. The transform may
/// open other stores, but not the one it is migrating.
pub type MigrationTransform =
    Arc<dyn Fn(u64, u64, &mut Migration<'_>) -> Result<(), MigrationError> + Send + Sync>;

/// File used when a configuration names neither a path nor an in-memory id.
pub const DEFAULT_FILE_NAME: &str = "default.vellum";

static DEFAULT_PATH: Lazy<RwLock<PathBuf>> =
    Lazy::new(|| RwLock::new(PathBuf::from(DEFAULT_FILE_NAME)));

static DEFAULT_CONFIGURATION: Lazy<RwLock<Configuration>> =
    Lazy::new(|| RwLock::new(Configuration::default()));

static REGISTRY: Lazy<RwLock<SchemaRegistry>> = Lazy::new(|| RwLock::new(SchemaRegistry::new()));

/// The process-wide default store path.
pub fn default_path() -> PathBuf {
    DEFAULT_PATH
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

/// Replace the process-wide default store path.
pub fn set_default_path(path: impl Into<PathBuf>) {
    *DEFAULT_PATH
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = path.into();
}

/// Register an object type with the process-wide registry.
///
/// Configurations without an explicit schema open with every registered
/// type that is part of the default schema.
pub fn register_object_type(object_type: ObjectSchema) {
    REGISTRY
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .register(object_type);
}

/// The default schema of the process-wide registry.
pub fn registered_schema() -> Schema {
    REGISTRY
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .default_schema()
}

/// Everything needed to open a store.
#[derive(Clone, Default)]
pub struct Configuration {
    /// File backing the store. Ignored when `in_memory_identifier` is set.
    pub storage_path: Option<PathBuf>,
    /// Name of a process-local in-memory store.
    pub in_memory_identifier: Option<String>,
    /// 64-byte key for encryption at rest.
    pub encryption_key: Option<Vec<u8>>,
    pub read_only: bool,
    /// Platform file protection class. Recorded, not enforced.
    pub file_protection: Option<String>,
    pub schema_version: u64,
    pub migration: Option<MigrationTransform>,
    /// Wipe and recreate the store instead of failing when a migration is
    /// needed and no transform is given.
    pub delete_if_migration_needed: bool,
    /// Object types to open with. `None` uses the registered default schema.
    pub schema: Option<Schema>,
    pub sync_identity: Option<SyncIdentity>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store backed by the file at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// A process-local in-memory store named `identifier`.
    pub fn in_memory(identifier: impl Into<String>) -> Self {
        Self {
            in_memory_identifier: Some(identifier.into()),
            ..Self::default()
        }
    }

    pub fn encryption_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn file_protection(mut self, class: impl Into<String>) -> Self {
        self.file_protection = Some(class.into());
        self
    }

    pub fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    pub fn migration<F>(mut self, transform: F) -> Self
    where
        F: Fn(u64, u64, &mut Migration<'_>) -> Result<(), MigrationError> + Send + Sync + 'static,
    {
        self.migration = Some(Arc::new(transform));
        self
    }

    pub fn delete_if_migration_needed(mut self, delete: bool) -> Self {
        self.delete_if_migration_needed = delete;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn sync_identity(mut self, identity: SyncIdentity) -> Self {
        self.sync_identity = Some(identity);
        self
    }

    /// The process-wide default configuration.
    pub fn default_configuration() -> Configuration {
        DEFAULT_CONFIGURATION
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the process-wide default configuration.
    ///
    /// Fails without changing anything if `config` does not validate.
    pub fn set_default_configuration(config: Configuration) -> Result<(), ConfigError> {
        resolve(&config)?;
        *DEFAULT_CONFIGURATION
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config;
        Ok(())
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("storage_path", &self.storage_path)
            .field("in_memory_identifier", &self.in_memory_identifier)
            .field("encrypted", &self.encryption_key.is_some())
            .field("read_only", &self.read_only)
            .field("file_protection", &self.file_protection)
            .field("schema_version", &self.schema_version)
            .field("migration", &self.migration.is_some())
            .field("delete_if_migration_needed", &self.delete_if_migration_needed)
            .field("schema", &self.schema.as_ref().map(|s| s.names().collect::<Vec<_>>()))
            .field("sync_identity", &self.sync_identity)
            .finish()
    }
}

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory(String),
}

impl StoreLocation {
    /// Key identifying the store within this process.
    pub fn identity(&self) -> String {
        match self {
            StoreLocation::File(path) => format!("file:{}", path.display()),
            StoreLocation::InMemory(id) => format!("memory:{}", id),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, StoreLocation::InMemory(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            StoreLocation::File(path) => Some(path),
            StoreLocation::InMemory(_) => None,
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// A configuration that passed validation.
#[derive(Clone)]
pub struct ValidatedDescriptor {
    pub location: StoreLocation,
    pub encryption_key: Option<StoreKey>,
    pub read_only: bool,
    pub file_protection: Option<String>,
    pub schema_version: u64,
    pub schema: Schema,
    pub migration: Option<MigrationTransform>,
    pub delete_if_migration_needed: bool,
    pub sync_identity: SyncIdentity,
}

impl fmt::Debug for ValidatedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedDescriptor")
            .field("location", &self.location)
            .field("encrypted", &self.encryption_key.is_some())
            .field("read_only", &self.read_only)
            .field("schema_version", &self.schema_version)
            .field("schema", &self.schema.names().collect::<Vec<_>>())
            .field("migration", &self.migration.is_some())
            .field("delete_if_migration_needed", &self.delete_if_migration_needed)
            .finish()
    }
}

/// Validate a configuration. Performs no I/O.
pub fn resolve(config: &Configuration) -> Result<ValidatedDescriptor, ConfigError> {
    let location = match (&config.in_memory_identifier, &config.storage_path) {
        (Some(id), _) if id.is_empty() => {
            return Err(ConfigError::InvalidConfiguration(
                "in-memory identifier is empty".into(),
            ))
        }
        (Some(id), _) => StoreLocation::InMemory(id.clone()),
        (None, Some(path)) if path.as_os_str().is_empty() => {
            return Err(ConfigError::InvalidConfiguration(
                "storage path is empty".into(),
            ))
        }
        (None, Some(path)) => StoreLocation::File(path.clone()),
        (None, None) => StoreLocation::File(default_path()),
    };

    if config.read_only && config.delete_if_migration_needed {
        return Err(ConfigError::InvalidConfiguration(
            "a read-only store cannot be deleted when a migration is needed".into(),
        ));
    }

    let encryption_key = config
        .encryption_key
        .as_deref()
        .map(|bytes| {
            StoreKey::from_slice(bytes).map_err(|_| ConfigError::InvalidEncryptionKey {
                expected: KEY_LENGTH,
                actual: bytes.len(),
            })
        })
        .transpose()?;

    if config.read_only && location.is_in_memory() {
        return Err(ConfigError::InvalidConfiguration(
            "an in-memory store cannot be read-only".into(),
        ));
    }

    let schema = config.schema.clone().unwrap_or_else(registered_schema);
    schema
        .validate()
        .map_err(|e| ConfigError::InvalidConfiguration(e.to_string()))?;

    Ok(ValidatedDescriptor {
        location,
        encryption_key,
        read_only: config.read_only,
        file_protection: config.file_protection.clone(),
        schema_version: config.schema_version,
        schema,
        migration: config.migration.clone(),
        delete_if_migration_needed: config.delete_if_migration_needed,
        sync_identity: config.sync_identity.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vellum_core::{Property, PropertyType};

    #[test]
    fn test_in_memory_identifier_wins() {
        let mut config = Configuration::with_path("/tmp/ignored.vellum");
        config.in_memory_identifier = Some("scratch".into());

        let descriptor = resolve(&config).unwrap();
        assert_eq!(descriptor.location, StoreLocation::InMemory("scratch".into()));
    }

    #[test]
    fn test_default_path_used() {
        let descriptor = resolve(&Configuration::new()).unwrap();
        assert_eq!(descriptor.location, StoreLocation::File(default_path()));
    }

    #[test]
    fn test_encryption_key_length() {
        let ok = Configuration::in_memory("k").encryption_key(vec![1u8; KEY_LENGTH]);
        assert!(resolve(&ok).unwrap().encryption_key.is_some());

        let short = Configuration::in_memory("k").encryption_key(vec![1u8; 32]);
        assert!(matches!(
            resolve(&short),
            Err(ConfigError::InvalidEncryptionKey {
                expected: 64,
                actual: 32
            })
        ));
    }

    #[test]
    fn test_empty_identifiers_rejected() {
        assert!(matches!(
            resolve(&Configuration::in_memory("")),
            Err(ConfigError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            resolve(&Configuration::with_path("")),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_read_only_in_memory_rejected() {
        let config = Configuration::in_memory("ro").read_only(true);
        assert!(matches!(
            resolve(&config),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let broken = ObjectSchema::new("Broken")
            .property(Property::new("ratio", PropertyType::Double))
            .primary_key("ratio");
        let config = Configuration::in_memory("s").schema(Schema::new(vec![broken]));
        assert!(matches!(
            resolve(&config),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_read_only_and_delete_checked_before_key() {
        let config = Configuration::with_path("p.vellum")
            .read_only(true)
            .delete_if_migration_needed(true)
            .encryption_key(vec![0u8; 3]);
        assert!(matches!(
            resolve(&config),
            Err(ConfigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_set_default_configuration_validates() {
        let bad = Configuration::in_memory("x").encryption_key(vec![0u8; 3]);
        assert!(Configuration::set_default_configuration(bad).is_err());
        assert_eq!(Configuration::default_configuration().encryption_key, None);
    }

    #[test]
    fn test_debug_hides_key() {
        let config = Configuration::in_memory("k").encryption_key(vec![9u8; KEY_LENGTH]);
        let debug = format!("{:?}", config);
        assert!(debug.contains("encrypted: true"));
        assert!(!debug.contains("9, 9"));
    }

    proptest! {
        #[test]
        fn prop_read_only_and_delete_always_invalid(
            in_memory in any::<bool>(),
            version in any::<u64>(),
            key_len in prop_oneof![Just(None), Just(Some(KEY_LENGTH)), (0usize..128).prop_map(Some)],
        ) {
            let mut config = if in_memory {
                Configuration::in_memory("p")
            } else {
                Configuration::with_path("p.vellum")
            };
            config = config
                .read_only(true)
                .delete_if_migration_needed(true)
                .schema_version(version);
            if let Some(len) = key_len {
                config = config.encryption_key(vec![0u8; len]);
            }

            prop_assert!(matches!(
                resolve(&config),
                Err(ConfigError::InvalidConfiguration(_))
            ));
        }
    }
}
