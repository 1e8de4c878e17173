//! Strong type definitions for Vellum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-assigned identifier of a stored object.
///
/// Keys are unique within an object type and never reused while the store
/// is open. They are not stable across a delete-and-recreate migration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey(pub u64);

impl ObjectKey {
    /// Create a key from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({})", self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectKey {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
