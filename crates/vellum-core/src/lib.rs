//! # Vellum Core
//!
//! Pure primitives for Vellum: property values, objects, and schemas.
//!
//! This crate contains no I/O and no storage. It defines the shapes that the
//! storage engine persists and the rules objects must satisfy to be stored.
//!
//! ## Key Types
//!
//! - [`Value`] - A dynamically typed property value
//! - [`Object`] - A record: property name to [`Value`]
//! - [`ObjectSchema`] - The declared shape of one object type
//! - [`Schema`] - The set of object types a store is opened with
//! - [`SchemaRegistry`] - Known object types, with opt-in exclusion from the default schema
//! - [`ObjectKey`] - Engine-assigned identifier of a stored object
//!
//! ## Conformance
//!
//! Objects are schema-less maps until they are written. On write, the engine
//! calls [`ObjectSchema::conform`], which fills defaults, rejects missing
//! required values and type mismatches, and rejects unknown properties.

pub mod error;
pub mod identity;
pub mod object;
pub mod schema;
pub mod time;
pub mod types;
pub mod value;

pub use error::{CoreError, Result};
pub use identity::SyncIdentity;
pub use object::Object;
pub use schema::{ObjectSchema, Property, Schema, SchemaRegistry};
pub use time::now_millis;
pub use types::ObjectKey;
pub use value::{PropertyType, Value};
