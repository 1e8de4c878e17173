//! # Vellum Permissions
//!
//! Permission management records for synchronized stores.
//!
//! ## Overview
//!
//! Access to a synchronized store is managed by writing records that a
//! remote authority processes asynchronously:
//!
//! - **PermissionChange**: grant or revoke access for a user
//! - **PermissionOffer**: create a token that grants access when redeemed
//! - **PermissionRequest**: redeem an offer's token
//!
//! The application only creates records. The authority answers each one
//! with a status code, which [`StatusWriter`] applies. A record's
//! [`PermissionStatus`] is derived from that code on every read.
//!
//! ## Schema
//!
//! The permission object types are excluded from default schemas. A store
//! that manages permissions adds [`permission_schema`] explicitly.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vellum_core::SyncIdentity;
//! use vellum_perms::{PermissionOffer, PermissionStore};
//! use vellum_store::{MemoryStore, StoreExt};
//!
//! fn example(store: &MemoryStore) -> vellum_perms::Result<()> {
//!     let identity = SyncIdentity::anonymous().with_realm_url("realms://example.com/~/notes");
//!     let offer = PermissionOffer::new(&identity, None, true, false, false);
//!     store.write(|txn| PermissionStore::new(txn).insert(&offer.into()))?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod model;
pub mod record;
pub mod status;
pub mod store;
pub mod writer;

pub use error::{PermsError, Result};
pub use model::{
    change_schema, offer_schema, permission_schema, request_schema, schema_for, IdentityContext,
    PermissionChange, PermissionOffer, PermissionRequest, WILDCARD,
};
pub use record::{PermissionKind, PermissionMeta, PermissionRecord};
pub use status::PermissionStatus;
pub use store::PermissionStore;
pub use writer::{AuthorityResponse, StatusWriter};
