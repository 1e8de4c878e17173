//! Error types for the store module.

use thiserror::Error;
use vellum_core::{CoreError, ObjectKey};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Object or schema failed validation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Stored definition could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Object not found.
    #[error("object not found: {object_type} {key}")]
    NotFound { object_type: String, key: ObjectKey },

    /// The object type is not part of the stored schema.
    #[error("unknown object type: {0}")]
    UnknownObjectType(String),

    /// Primary key lookup on a type without a primary key.
    #[error("object type {0} has no primary key")]
    NoPrimaryKey(String),

    /// Index lookup on a property without an index.
    #[error("property {object_type}.{property} is not indexed")]
    NotIndexed {
        object_type: String,
        property: String,
    },

    /// A primary key value is already taken.
    #[error("duplicate primary key {key} for {object_type}")]
    DuplicateKey { object_type: String, key: String },

    /// Write attempted on a read-only store.
    #[error("store is read-only")]
    ReadOnly,

    /// Encryption key has the wrong length.
    #[error("encryption key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Encryption key does not fit the store.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    /// Stored data failed authentication.
    #[error("failed to decrypt stored object")]
    Decryption,

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Storage layout migration error.
    #[error("layout migration error: {0}")]
    Migration(String),

    /// Read-only open of a store that was never initialized.
    #[error("store has not been initialized")]
    Uninitialized,
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
