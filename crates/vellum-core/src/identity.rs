//! Sync identity attached to an open store.

use serde::{Deserialize, Serialize};

/// The synchronized identity of a store: which remote realm it mirrors and
/// which user opened it.
///
/// Either part may be unknown, e.g. a local-only store or no authenticated
/// user. Permission constructors fall back to wildcards in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncIdentity {
    /// URL of the remote realm this store synchronizes with.
    pub realm_url: Option<String>,
    /// Identity of the authenticated user.
    pub user_id: Option<String>,
}

impl SyncIdentity {
    /// An identity with nothing known.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Set the realm URL.
    pub fn with_realm_url(mut self, url: impl Into<String>) -> Self {
        self.realm_url = Some(url.into());
        self
    }

    /// Set the user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}
