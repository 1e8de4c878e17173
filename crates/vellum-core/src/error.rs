//! Error types for Vellum Core.

use thiserror::Error;

use crate::value::PropertyType;

/// Errors raised while validating schemas and objects.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("object type {0} is declared more than once")]
    DuplicateObjectType(String),

    #[error("property {object_type}.{property} is declared more than once")]
    DuplicateProperty {
        object_type: String,
        property: String,
    },

    #[error("invalid primary key on {object_type}: {reason}")]
    InvalidPrimaryKey { object_type: String, reason: String },

    #[error("property {object_type}.{property} of type {kind} cannot be indexed")]
    UnindexableProperty {
        object_type: String,
        property: String,
        kind: PropertyType,
    },

    #[error("invalid default for {object_type}.{property}: expected {expected}")]
    InvalidDefault {
        object_type: String,
        property: String,
        expected: PropertyType,
    },

    #[error("missing required property {object_type}.{property}")]
    MissingProperty {
        object_type: String,
        property: String,
    },

    #[error("property {object_type}.{property} expects {expected}, got {found}")]
    TypeMismatch {
        object_type: String,
        property: String,
        expected: PropertyType,
        found: String,
    },

    #[error("object type {object_type} has no property {property}")]
    UnknownProperty {
        object_type: String,
        property: String,
    },

    #[error("unknown object type: {0}")]
    UnknownObjectType(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
