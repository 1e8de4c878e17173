//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur while processing permission records.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The authority could not be reached or failed to answer.
    #[error("authority error: {0}")]
    Authority(String),

    /// Timeout waiting for the authority.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Permission record operation failed.
    #[error("permission error: {0}")]
    Perms(#[from] vellum_perms::PermsError),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] vellum_store::StoreError),

    /// A blocking store task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
