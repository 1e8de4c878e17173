//! Processing status of permission records.
//!
//! Status is never stored. It is derived from the record's status code every
//! time it is read, so a code written by the authority is reflected
//! immediately.

use serde::{Deserialize, Serialize};

/// Status code written by the authority for a processed record.
pub const SUCCESS: i64 = 0;

/// No offer matches the request's token.
pub const NOT_FOUND: i64 = 1;

/// The matched offer has expired.
pub const EXPIRED: i64 = 2;

/// The user may not make this change.
pub const DENIED: i64 = 3;

/// The record is malformed (e.g. a request without a token).
pub const INVALID: i64 = 4;

/// Where a record is in its processing lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionStatus {
    /// The authority has not responded yet.
    NotProcessed,
    /// The authority applied the record.
    Success,
    /// The authority rejected the record. See the status code and message.
    Error,
}

impl PermissionStatus {
    /// Derive the status from a status code.
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            None => PermissionStatus::NotProcessed,
            Some(SUCCESS) => PermissionStatus::Success,
            Some(_) => PermissionStatus::Error,
        }
    }

    /// Whether the authority has responded.
    pub fn is_processed(self) -> bool {
        self != PermissionStatus::NotProcessed
    }
}
