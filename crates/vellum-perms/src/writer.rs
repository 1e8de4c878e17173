//! Applying authority responses to permission records.
//!
//! The status fields of a record (`statusCode`, `statusMessage`,
//! `updatedAt`) and an offer's token are owned by the remote authority.
//! [`StatusWriter`] is the only code path that writes them. There is no
//! conflict resolution: the last response applied wins.

use std::ops::DerefMut;

use serde::{Deserialize, Serialize};
use tracing::debug;
use vellum_store::WriteTransaction;

use crate::error::{PermsError, Result};
use crate::record::{PermissionKind, PermissionRecord};
use crate::status::SUCCESS;
use crate::store::PermissionStore;

/// The authority's verdict on one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityResponse {
    /// 0 for success, anything else for an error.
    pub status_code: i64,
    pub status_message: Option<String>,
    /// Token assigned to an offer. Ignored for other kinds.
    pub token: Option<String>,
}

impl AuthorityResponse {
    pub fn success() -> Self {
        Self {
            status_code: SUCCESS,
            status_message: None,
            token: None,
        }
    }

    pub fn error(status_code: i64, message: impl Into<String>) -> Self {
        Self {
            status_code,
            status_message: Some(message.into()),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Writes authority responses into stored records.
pub struct StatusWriter;

impl StatusWriter {
    /// Apply `response` to the record `id` of `kind`, stamping `updated_at`
    /// with `now`. Returns the updated record.
    pub fn apply<T>(
        txn: T,
        kind: PermissionKind,
        id: &str,
        response: &AuthorityResponse,
        now: i64,
    ) -> Result<PermissionRecord>
    where
        T: DerefMut,
        T::Target: WriteTransaction,
    {
        let mut perms = PermissionStore::new(txn);
        let (key, mut record) = perms.find(kind, id)?.ok_or_else(|| PermsError::RecordNotFound {
            kind,
            id: id.to_string(),
        })?;

        let meta = record.meta_mut();
        meta.status_code = Some(response.status_code);
        meta.status_message = response.status_message.clone();
        meta.updated_at = now;

        if let (PermissionRecord::Offer(offer), Some(token)) = (&mut record, &response.token) {
            offer.token = token.clone();
        }

        perms
            .txn_mut()
            .update(kind.object_type(), key, record.to_object())?;
        debug!(
            %kind,
            id,
            status_code = response.status_code,
            "applied authority response"
        );
        Ok(record)
    }
}
