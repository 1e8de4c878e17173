//! Dynamically typed property values.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The declared type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    Bool,
    Int,
    Double,
    String,
    Bytes,
    /// Unix milliseconds.
    Timestamp,
}

impl PropertyType {
    /// Whether a secondary index may be declared on this type.
    pub fn is_indexable(self) -> bool {
        matches!(
            self,
            PropertyType::Bool | PropertyType::Int | PropertyType::String | PropertyType::Timestamp
        )
    }

    /// Whether this type may serve as a primary key.
    pub fn is_primary_key_type(self) -> bool {
        matches!(self, PropertyType::Int | PropertyType::String)
    }

    /// Lowercase type name.
    pub fn name(self) -> &'static str {
        match self {
            PropertyType::Bool => "bool",
            PropertyType::Int => "int",
            PropertyType::Double => "double",
            PropertyType::String => "string",
            PropertyType::Bytes => "bytes",
            PropertyType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Bytes(Bytes),
    /// Unix milliseconds.
    Timestamp(i64),
}

// Tags for index_bytes. Persisted in index keys; never renumber.
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_TIMESTAMP: u8 = 6;

impl Value {
    /// The type of this value, or `None` for [`Value::Null`].
    pub fn kind(&self) -> Option<PropertyType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(PropertyType::Bool),
            Value::Int(_) => Some(PropertyType::Int),
            Value::Double(_) => Some(PropertyType::Double),
            Value::String(_) => Some(PropertyType::String),
            Value::Bytes(_) => Some(PropertyType::Bytes),
            Value::Timestamp(_) => Some(PropertyType::Timestamp),
        }
    }

    /// Type name for error messages.
    pub fn kind_name(&self) -> &'static str {
        self.kind().map(PropertyType::name).unwrap_or("null")
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Deterministic byte encoding used for index and primary key lookups.
    ///
    /// Equal values always encode equally; values of different types never
    /// collide because of the leading tag byte.
    pub fn index_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        match self {
            Value::Null => out.push(TAG_NULL),
            Value::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
            Value::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Double(d) => {
                out.push(TAG_DOUBLE);
                out.extend_from_slice(&d.to_bits().to_be_bytes());
            }
            Value::String(s) => {
                out.push(TAG_STRING);
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(TAG_BYTES);
                out.extend_from_slice(b);
            }
            Value::Timestamp(t) => {
                out.push(TAG_TIMESTAMP);
                out.extend_from_slice(&t.to_be_bytes());
            }
        }
        out
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Timestamp(t) => write!(f, "@{}", t),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(b))
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
