//! Error types for opening and using a database.

use thiserror::Error;
use vellum_core::CoreError;
use vellum_perms::PermsError;
use vellum_store::StoreError;
use vellum_sync::SyncError;

/// A configuration that cannot describe a store.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Encryption key of the wrong length.
    #[error("encryption key must be {expected} bytes, got {actual}")]
    InvalidEncryptionKey { expected: usize, actual: usize },

    /// Contradictory or incomplete settings.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Failure inside a migration transform.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The transform gave up.
    #[error("migration transform failed: {0}")]
    Transform(#[from] anyhow::Error),

    /// An object does not fit the new schema after the transform ran.
    #[error("object of type {object_type} does not fit the new schema: {reason}")]
    InvalidObject { object_type: String, reason: String },

    /// The transform named a type in neither schema.
    #[error("unknown object type: {0}")]
    UnknownObjectType(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl MigrationError {
    /// A transform failure with a plain message.
    pub fn transform(message: impl Into<String>) -> Self {
        MigrationError::Transform(anyhow::anyhow!(message.into()))
    }
}

impl From<CoreError> for MigrationError {
    fn from(e: CoreError) -> Self {
        MigrationError::Store(StoreError::Core(e))
    }
}

/// Why a store could not be opened.
#[derive(Debug, Error)]
pub enum OpenError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The stored schema differs and neither a transform nor deletion is allowed.
    #[error("schema mismatch (stored version {stored:?}, requested {requested}): {reason}")]
    SchemaMismatch {
        stored: Option<u64>,
        requested: u64,
        reason: String,
    },

    /// The stored version is newer than the requested one.
    #[error("stored schema version {stored} is newer than requested version {requested}")]
    SchemaVersionRegression { stored: u64, requested: u64 },

    /// The open would need to write, but the store is read-only.
    #[error("open rejected: {0}")]
    Rejected(String),

    /// The store is already open in this process with incompatible settings.
    #[error("store already open with different settings: {0}")]
    MismatchedConfig(String),

    /// The migration transform failed. Nothing was written.
    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The background open task panicked or was cancelled.
    #[error("open task failed: {0}")]
    Task(String),
}

/// Errors that can occur while using an open database.
#[derive(Debug, Error)]
pub enum VellumError {
    /// Open error.
    #[error("open error: {0}")]
    Open(#[from] OpenError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Permission error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, VellumError>;
