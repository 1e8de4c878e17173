//! Error types for the permissions module.

use thiserror::Error;
use vellum_core::CoreError;
use vellum_store::StoreError;

use crate::record::PermissionKind;

/// Errors that can occur during permission operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A stored object is not a valid permission record.
    #[error("invalid {kind} record: {reason}")]
    InvalidRecord { kind: PermissionKind, reason: String },

    /// Record not found.
    #[error("{kind} record not found: {id}")]
    RecordNotFound { kind: PermissionKind, id: String },

    /// New records must not carry a status; only the authority sets it.
    #[error("record {0} already carries a status")]
    StatusAlreadySet(String),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
