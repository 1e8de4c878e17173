//! Permission records: shared metadata and the tagged record type.
//!
//! Every record kind is its own object type. The metadata fields are
//! flattened into each type rather than stored in a shared base table.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vellum_core::{now_millis, Object, Value};

use crate::error::{PermsError, Result};
use crate::model::{PermissionChange, PermissionOffer, PermissionRequest};
use crate::status::PermissionStatus;

/// Stored property names.
pub mod fields {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const STATUS_CODE: &str = "statusCode";
    pub const STATUS_MESSAGE: &str = "statusMessage";
    pub const REALM_URL: &str = "realmUrl";
    pub const USER_ID: &str = "userId";
    pub const MAY_READ: &str = "mayRead";
    pub const MAY_WRITE: &str = "mayWrite";
    pub const MAY_MANAGE: &str = "mayManage";
    pub const TOKEN: &str = "token";
    pub const EXPIRES_AT: &str = "expiresAt";
}

/// The kinds of permission record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermissionKind {
    Change,
    Offer,
    Request,
}

impl PermissionKind {
    /// All kinds, in processing order.
    pub const ALL: [PermissionKind; 3] = [
        PermissionKind::Change,
        PermissionKind::Offer,
        PermissionKind::Request,
    ];

    /// Name of the object type storing this kind.
    pub fn object_type(self) -> &'static str {
        match self {
            PermissionKind::Change => "PermissionChange",
            PermissionKind::Offer => "PermissionOffer",
            PermissionKind::Request => "PermissionRequest",
        }
    }

    pub fn from_object_type(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.object_type() == name)
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.object_type())
    }
}

/// Metadata shared by every permission record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMeta {
    /// Unique id, a UUID v4 string generated at creation.
    pub id: String,
    /// Creation time in Unix milliseconds.
    pub created_at: i64,
    /// Time of the last status update in Unix milliseconds.
    pub updated_at: i64,
    /// Written by the authority: 0 for success, anything else for an error.
    pub status_code: Option<i64>,
    /// Written by the authority alongside the status code.
    pub status_message: Option<String>,
}

impl PermissionMeta {
    /// Fresh metadata: new id, created now, not processed.
    pub fn new() -> Self {
        Self::at(now_millis())
    }

    /// Fresh metadata created at `now`.
    pub fn at(now: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            status_code: None,
            status_message: None,
        }
    }

    /// Derived from `status_code` on every call.
    pub fn status(&self) -> PermissionStatus {
        PermissionStatus::from_code(self.status_code)
    }

    pub(crate) fn write_to(&self, object: &mut Object) {
        object.set(fields::ID, self.id.as_str());
        object.set(fields::CREATED_AT, Value::Timestamp(self.created_at));
        object.set(fields::UPDATED_AT, Value::Timestamp(self.updated_at));
        object.set(fields::STATUS_CODE, self.status_code);
        object.set(fields::STATUS_MESSAGE, self.status_message.clone());
    }

    pub(crate) fn read_from(kind: PermissionKind, object: &Object) -> Result<Self> {
        Ok(Self {
            id: required_str(kind, object, fields::ID)?.to_string(),
            created_at: required_timestamp(kind, object, fields::CREATED_AT)?,
            updated_at: required_timestamp(kind, object, fields::UPDATED_AT)?,
            status_code: object.get_int(fields::STATUS_CODE),
            status_message: object.get_str(fields::STATUS_MESSAGE).map(String::from),
        })
    }
}

impl Default for PermissionMeta {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn required_str<'a>(
    kind: PermissionKind,
    object: &'a Object,
    name: &str,
) -> Result<&'a str> {
    object.get_str(name).ok_or_else(|| missing(kind, name))
}

pub(crate) fn required_bool(kind: PermissionKind, object: &Object, name: &str) -> Result<bool> {
    object.get_bool(name).ok_or_else(|| missing(kind, name))
}

fn required_timestamp(kind: PermissionKind, object: &Object, name: &str) -> Result<i64> {
    object.get_timestamp(name).ok_or_else(|| missing(kind, name))
}

fn missing(kind: PermissionKind, name: &str) -> PermsError {
    PermsError::InvalidRecord {
        kind,
        reason: format!("missing {}", name),
    }
}

/// Any permission record.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionRecord {
    Change(PermissionChange),
    Offer(PermissionOffer),
    Request(PermissionRequest),
}

impl PermissionRecord {
    pub fn kind(&self) -> PermissionKind {
        match self {
            PermissionRecord::Change(_) => PermissionKind::Change,
            PermissionRecord::Offer(_) => PermissionKind::Offer,
            PermissionRecord::Request(_) => PermissionKind::Request,
        }
    }

    pub fn meta(&self) -> &PermissionMeta {
        match self {
            PermissionRecord::Change(change) => &change.meta,
            PermissionRecord::Offer(offer) => &offer.meta,
            PermissionRecord::Request(request) => &request.meta,
        }
    }

    pub(crate) fn meta_mut(&mut self) -> &mut PermissionMeta {
        match self {
            PermissionRecord::Change(change) => &mut change.meta,
            PermissionRecord::Offer(offer) => &mut offer.meta,
            PermissionRecord::Request(request) => &mut request.meta,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta().id
    }

    pub fn status(&self) -> PermissionStatus {
        self.meta().status()
    }

    /// The stored representation.
    pub fn to_object(&self) -> Object {
        match self {
            PermissionRecord::Change(change) => change.to_object(),
            PermissionRecord::Offer(offer) => offer.to_object(),
            PermissionRecord::Request(request) => request.to_object(),
        }
    }

    /// Decode a stored object of the given kind.
    pub fn from_object(kind: PermissionKind, object: &Object) -> Result<Self> {
        Ok(match kind {
            PermissionKind::Change => PermissionRecord::Change(PermissionChange::from_object(object)?),
            PermissionKind::Offer => PermissionRecord::Offer(PermissionOffer::from_object(object)?),
            PermissionKind::Request => {
                PermissionRecord::Request(PermissionRequest::from_object(object)?)
            }
        })
    }
}

impl From<PermissionChange> for PermissionRecord {
    fn from(change: PermissionChange) -> Self {
        PermissionRecord::Change(change)
    }
}

impl From<PermissionOffer> for PermissionRecord {
    fn from(offer: PermissionOffer) -> Self {
        PermissionRecord::Offer(offer)
    }
}

impl From<PermissionRequest> for PermissionRecord {
    fn from(request: PermissionRequest) -> Self {
        PermissionRecord::Request(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_ids_unique() {
        let a = PermissionMeta::new();
        let b = PermissionMeta::new();
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
        assert_eq!(a.created_at, a.updated_at);
    }

    #[test]
    fn test_status_follows_code() {
        let mut record = PermissionRecord::from(PermissionRequest::new("abc"));
        assert_eq!(record.status(), PermissionStatus::NotProcessed);

        record.meta_mut().status_code = Some(0);
        assert_eq!(record.status(), PermissionStatus::Success);

        record.meta_mut().status_code = Some(7);
        assert_eq!(record.status(), PermissionStatus::Error);
    }

    #[test]
    fn test_kind_object_types() {
        for kind in PermissionKind::ALL {
            assert_eq!(PermissionKind::from_object_type(kind.object_type()), Some(kind));
        }
        assert_eq!(PermissionKind::from_object_type("Person"), None);
    }

    #[test]
    fn test_missing_field_rejected() {
        let object = Object::new().with(fields::ID, "x");
        let result = PermissionRecord::from_object(PermissionKind::Request, &object);
        assert!(matches!(result, Err(PermsError::InvalidRecord { .. })));
    }
}
