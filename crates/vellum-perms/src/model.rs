//! The three permission record kinds and their object schemas.

use vellum_core::{Object, ObjectSchema, Property, PropertyType, Schema, SyncIdentity, Value};

use crate::error::Result;
use crate::record::{fields, required_bool, required_str, PermissionKind, PermissionMeta};

/// Realm URL or user id meaning "all".
pub const WILDCARD: &str = "*";

/// The identity a store was opened with.
///
/// Record constructors use it to fill in the realm URL. Either value may be
/// unknown.
pub trait IdentityContext {
    fn realm_url(&self) -> Option<&str>;

    fn user_id(&self) -> Option<&str>;
}

impl IdentityContext for SyncIdentity {
    fn realm_url(&self) -> Option<&str> {
        self.realm_url.as_deref()
    }

    fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }
}

/// A request to change another user's access to a realm.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionChange {
    pub meta: PermissionMeta,
    /// Realm the change applies to, `*` for all realms.
    pub realm_url: String,
    /// User the change applies to, `*` for all users.
    pub user_id: String,
    /// `None` leaves the permission unchanged.
    pub may_read: Option<bool>,
    pub may_write: Option<bool>,
    pub may_manage: Option<bool>,
}

impl PermissionChange {
    /// A change for `user` (all users when `None`) on the context's realm.
    pub fn new(
        ctx: &(impl IdentityContext + ?Sized),
        user: Option<&str>,
        may_read: Option<bool>,
        may_write: Option<bool>,
        may_manage: Option<bool>,
    ) -> Self {
        Self {
            meta: PermissionMeta::new(),
            realm_url: ctx.realm_url().unwrap_or(WILDCARD).to_string(),
            user_id: user.unwrap_or(WILDCARD).to_string(),
            may_read,
            may_write,
            may_manage,
        }
    }

    pub fn to_object(&self) -> Object {
        let mut object = Object::new();
        self.meta.write_to(&mut object);
        object.set(fields::REALM_URL, self.realm_url.as_str());
        object.set(fields::USER_ID, self.user_id.as_str());
        object.set(fields::MAY_READ, self.may_read);
        object.set(fields::MAY_WRITE, self.may_write);
        object.set(fields::MAY_MANAGE, self.may_manage);
        object
    }

    pub fn from_object(object: &Object) -> Result<Self> {
        let kind = PermissionKind::Change;
        Ok(Self {
            meta: PermissionMeta::read_from(kind, object)?,
            realm_url: required_str(kind, object, fields::REALM_URL)?.to_string(),
            user_id: required_str(kind, object, fields::USER_ID)?.to_string(),
            may_read: object.get_bool(fields::MAY_READ),
            may_write: object.get_bool(fields::MAY_WRITE),
            may_manage: object.get_bool(fields::MAY_MANAGE),
        })
    }
}

/// An offer of access to a realm, redeemable with its token.
///
/// The token is empty until the authority assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionOffer {
    pub meta: PermissionMeta,
    pub token: String,
    pub realm_url: String,
    pub may_read: bool,
    pub may_write: bool,
    pub may_manage: bool,
    /// Unix milliseconds; `None` never expires.
    pub expires_at: Option<i64>,
}

impl PermissionOffer {
    /// An offer for the context's realm. The realm URL is empty when unknown.
    pub fn new(
        ctx: &(impl IdentityContext + ?Sized),
        expires_at: Option<i64>,
        may_read: bool,
        may_write: bool,
        may_manage: bool,
    ) -> Self {
        Self {
            meta: PermissionMeta::new(),
            token: String::new(),
            realm_url: ctx.realm_url().unwrap_or_default().to_string(),
            may_read,
            may_write,
            may_manage,
            expires_at,
        }
    }

    /// Whether the offer can no longer be redeemed at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn to_object(&self) -> Object {
        let mut object = Object::new();
        self.meta.write_to(&mut object);
        object.set(fields::TOKEN, self.token.as_str());
        object.set(fields::REALM_URL, self.realm_url.as_str());
        object.set(fields::MAY_READ, self.may_read);
        object.set(fields::MAY_WRITE, self.may_write);
        object.set(fields::MAY_MANAGE, self.may_manage);
        object.set(fields::EXPIRES_AT, self.expires_at.map(Value::Timestamp));
        object
    }

    pub fn from_object(object: &Object) -> Result<Self> {
        let kind = PermissionKind::Offer;
        Ok(Self {
            meta: PermissionMeta::read_from(kind, object)?,
            token: required_str(kind, object, fields::TOKEN)?.to_string(),
            realm_url: required_str(kind, object, fields::REALM_URL)?.to_string(),
            may_read: required_bool(kind, object, fields::MAY_READ)?,
            may_write: required_bool(kind, object, fields::MAY_WRITE)?,
            may_manage: required_bool(kind, object, fields::MAY_MANAGE)?,
            expires_at: object.get_timestamp(fields::EXPIRES_AT),
        })
    }
}

/// A request to redeem an offer by its token.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub meta: PermissionMeta,
    pub token: Option<String>,
}

impl PermissionRequest {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            meta: PermissionMeta::new(),
            token: Some(token.into()),
        }
    }

    pub fn to_object(&self) -> Object {
        let mut object = Object::new();
        self.meta.write_to(&mut object);
        object.set(fields::TOKEN, self.token.clone());
        object
    }

    pub fn from_object(object: &Object) -> Result<Self> {
        Ok(Self {
            meta: PermissionMeta::read_from(PermissionKind::Request, object)?,
            token: object.get_str(fields::TOKEN).map(String::from),
        })
    }
}

fn with_meta(name: &str) -> ObjectSchema {
    ObjectSchema::new(name)
        .property(Property::new(fields::ID, PropertyType::String).indexed())
        .property(Property::new(fields::CREATED_AT, PropertyType::Timestamp))
        .property(Property::new(fields::UPDATED_AT, PropertyType::Timestamp))
        .property(Property::new(fields::STATUS_CODE, PropertyType::Int).optional())
        .property(Property::new(fields::STATUS_MESSAGE, PropertyType::String).optional())
        .exclude_from_default_schema()
}

/// Object type of [`PermissionChange`].
pub fn change_schema() -> ObjectSchema {
    with_meta(PermissionKind::Change.object_type())
        .property(Property::new(fields::REALM_URL, PropertyType::String).with_default(WILDCARD))
        .property(Property::new(fields::USER_ID, PropertyType::String).with_default(WILDCARD))
        .property(Property::new(fields::MAY_READ, PropertyType::Bool).optional())
        .property(Property::new(fields::MAY_WRITE, PropertyType::Bool).optional())
        .property(Property::new(fields::MAY_MANAGE, PropertyType::Bool).optional())
}

/// Object type of [`PermissionOffer`]. The token has a non-unique index.
pub fn offer_schema() -> ObjectSchema {
    with_meta(PermissionKind::Offer.object_type())
        .property(
            Property::new(fields::TOKEN, PropertyType::String)
                .indexed()
                .with_default(""),
        )
        .property(Property::new(fields::REALM_URL, PropertyType::String).with_default(""))
        .property(Property::new(fields::MAY_READ, PropertyType::Bool).with_default(true))
        .property(Property::new(fields::MAY_WRITE, PropertyType::Bool).with_default(false))
        .property(Property::new(fields::MAY_MANAGE, PropertyType::Bool).with_default(false))
        .property(Property::new(fields::EXPIRES_AT, PropertyType::Timestamp).optional())
}

/// Object type of [`PermissionRequest`]. The token is the primary key.
pub fn request_schema() -> ObjectSchema {
    with_meta(PermissionKind::Request.object_type())
        .property(Property::new(fields::TOKEN, PropertyType::String).optional())
        .primary_key(fields::TOKEN)
}

/// The object schema of a kind.
pub fn schema_for(kind: PermissionKind) -> ObjectSchema {
    match kind {
        PermissionKind::Change => change_schema(),
        PermissionKind::Offer => offer_schema(),
        PermissionKind::Request => request_schema(),
    }
}

/// All permission object types.
///
/// None of them is part of a default schema; add this to a store's schema
/// to opt in.
pub fn permission_schema() -> Schema {
    PermissionKind::ALL.into_iter().map(schema_for).collect()
}
