//! Object schemas.
//!
//! The engine has no inheritance: every concrete object type is its own
//! [`ObjectSchema`] with all of its properties listed. Shared fields are
//! shared by composition in the types that map onto objects, not here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::object::Object;
use crate::value::{PropertyType, Value};

/// A declared property of an object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub kind: PropertyType,
    /// Whether the property may hold [`Value::Null`].
    pub optional: bool,
    /// Whether a non-unique secondary index is maintained.
    pub indexed: bool,
    /// Value used when an object omits the property.
    pub default: Option<Value>,
}

impl Property {
    /// A required, unindexed property.
    pub fn new(name: impl Into<String>, kind: PropertyType) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
            indexed: false,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// The declared shape of one object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub name: String,
    pub properties: Vec<Property>,
    /// Property holding the unique primary key, if any.
    pub primary_key: Option<String>,
    /// Whether [`SchemaRegistry::default_schema`] includes this type.
    pub include_in_default_schema: bool,
}

impl ObjectSchema {
    /// An object type with no properties, included in the default schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            primary_key: None,
            include_in_default_schema: true,
        }
    }

    /// Add a property.
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare the primary key property.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    /// Keep this type out of the default schema; it must be opted into.
    pub fn exclude_from_default_schema(mut self) -> Self {
        self.include_in_default_schema = false;
        self
    }

    /// Look up a property by name.
    pub fn property_named(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Properties with a secondary index.
    pub fn indexed_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.indexed)
    }

    /// Whether two definitions describe the same stored shape.
    ///
    /// Default-schema membership is not part of the stored shape.
    pub fn same_shape(&self, other: &ObjectSchema) -> bool {
        self.name == other.name
            && self.properties == other.properties
            && self.primary_key == other.primary_key
    }

    /// Check the definition itself.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for property in &self.properties {
            if !seen.insert(property.name.as_str()) {
                return Err(CoreError::DuplicateProperty {
                    object_type: self.name.clone(),
                    property: property.name.clone(),
                });
            }
            if property.indexed && !property.kind.is_indexable() {
                return Err(CoreError::UnindexableProperty {
                    object_type: self.name.clone(),
                    property: property.name.clone(),
                    kind: property.kind,
                });
            }
            if let Some(default) = &property.default {
                let fits = match default.kind() {
                    Some(kind) => kind == property.kind,
                    None => property.optional,
                };
                if !fits {
                    return Err(CoreError::InvalidDefault {
                        object_type: self.name.clone(),
                        property: property.name.clone(),
                        expected: property.kind,
                    });
                }
            }
        }

        if let Some(pk) = &self.primary_key {
            let property = self.property_named(pk).ok_or_else(|| CoreError::InvalidPrimaryKey {
                object_type: self.name.clone(),
                reason: format!("no property named {}", pk),
            })?;
            if !property.kind.is_primary_key_type() {
                return Err(CoreError::InvalidPrimaryKey {
                    object_type: self.name.clone(),
                    reason: format!("{} properties cannot be primary keys", property.kind),
                });
            }
        }

        Ok(())
    }

    /// Conform an object to this schema for writing.
    ///
    /// Missing or null properties take their default, or null when optional.
    /// Missing required values, type mismatches and unknown properties fail.
    pub fn conform(&self, object: &Object) -> Result<Object> {
        for name in object.names() {
            if self.property_named(name).is_none() {
                return Err(CoreError::UnknownProperty {
                    object_type: self.name.clone(),
                    property: name.to_string(),
                });
            }
        }
        self.fill(object)
    }

    /// Like [`conform`](Self::conform), but drops properties this schema
    /// does not declare instead of failing.
    ///
    /// Used after a migration, where removed properties simply disappear.
    pub fn project(&self, object: &Object) -> Result<Object> {
        self.fill(object)
    }

    fn fill(&self, object: &Object) -> Result<Object> {
        let mut out = Object::new();
        for property in &self.properties {
            let value = match object.get(&property.name) {
                Some(Value::Null) | None => match (&property.default, property.optional) {
                    (Some(default), _) => default.clone(),
                    (None, true) => Value::Null,
                    (None, false) => {
                        return Err(CoreError::MissingProperty {
                            object_type: self.name.clone(),
                            property: property.name.clone(),
                        })
                    }
                },
                Some(value) => {
                    if value.kind() != Some(property.kind) {
                        return Err(CoreError::TypeMismatch {
                            object_type: self.name.clone(),
                            property: property.name.clone(),
                            expected: property.kind,
                            found: value.kind_name().to_string(),
                        });
                    }
                    value.clone()
                }
            };
            out.set(property.name.clone(), value);
        }
        Ok(out)
    }

    /// The primary key value of a conformed object.
    ///
    /// A null optional primary key is no key at all and never collides.
    pub fn primary_key_of<'a>(&self, object: &'a Object) -> Option<&'a Value> {
        self.primary_key
            .as_deref()
            .and_then(|pk| object.get(pk))
            .filter(|value| !value.is_null())
    }
}

/// The set of object types a store is opened with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    object_types: Vec<ObjectSchema>,
}

impl Schema {
    pub fn new(object_types: Vec<ObjectSchema>) -> Self {
        Self { object_types }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Add an object type, replacing any existing one with the same name.
    pub fn with(mut self, object_type: ObjectSchema) -> Self {
        self.insert(object_type);
        self
    }

    /// Add an object type, replacing any existing one with the same name.
    pub fn insert(&mut self, object_type: ObjectSchema) {
        match self.object_types.iter_mut().find(|t| t.name == object_type.name) {
            Some(existing) => *existing = object_type,
            None => self.object_types.push(object_type),
        }
    }

    /// Add every type of `other`.
    pub fn extend(mut self, other: Schema) -> Self {
        for object_type in other.object_types {
            self.insert(object_type);
        }
        self
    }

    pub fn object_type(&self, name: &str) -> Option<&ObjectSchema> {
        self.object_types.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.object_type(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectSchema> {
        self.object_types.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.object_types.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.object_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_types.is_empty()
    }

    /// Validate every object type and reject duplicate type names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for object_type in &self.object_types {
            if !seen.insert(object_type.name.as_str()) {
                return Err(CoreError::DuplicateObjectType(object_type.name.clone()));
            }
            object_type.validate()?;
        }
        Ok(())
    }
}

impl FromIterator<ObjectSchema> for Schema {
    fn from_iter<I: IntoIterator<Item = ObjectSchema>>(iter: I) -> Self {
        let mut schema = Schema::empty();
        for object_type in iter {
            schema.insert(object_type);
        }
        schema
    }
}

/// Registry of known object types.
///
/// The default schema is every registered type that did not opt out with
/// [`ObjectSchema::exclude_from_default_schema`]. Excluded types are only
/// present when named explicitly through [`schema_with`](Self::schema_with).
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    object_types: Vec<ObjectSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object type, replacing one with the same name.
    pub fn register(&mut self, object_type: ObjectSchema) -> &mut Self {
        match self.object_types.iter_mut().find(|t| t.name == object_type.name) {
            Some(existing) => *existing = object_type,
            None => self.object_types.push(object_type),
        }
        self
    }

    /// Register every type of a schema.
    pub fn register_all(&mut self, schema: Schema) -> &mut Self {
        for object_type in schema.object_types {
            self.register(object_type);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ObjectSchema> {
        self.object_types.iter().find(|t| t.name == name)
    }

    /// The implicit schema: registered types that are not opted out.
    pub fn default_schema(&self) -> Schema {
        self.object_types
            .iter()
            .filter(|t| t.include_in_default_schema)
            .cloned()
            .collect()
    }

    /// A schema made of exactly the named types.
    pub fn schema_with<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<Schema> {
        names
            .into_iter()
            .map(|name| {
                self.get(name)
                    .cloned()
                    .ok_or_else(|| CoreError::UnknownObjectType(name.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> ObjectSchema {
        ObjectSchema::new("Person")
            .property(Property::new("name", PropertyType::String).indexed())
            .property(Property::new("age", PropertyType::Int).with_default(0i64))
            .property(Property::new("email", PropertyType::String).optional())
            .primary_key("name")
    }

    #[test]
    fn test_valid_schema() {
        Schema::new(vec![person()]).validate().unwrap();
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let schema = ObjectSchema::new("Dup")
            .property(Property::new("a", PropertyType::Int))
            .property(Property::new("a", PropertyType::String));
        assert!(matches!(
            schema.validate(),
            Err(CoreError::DuplicateProperty { .. })
        ));
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let schema = Schema::new(vec![person(), person()]);
        assert!(matches!(
            schema.validate(),
            Err(CoreError::DuplicateObjectType(_))
        ));
    }

    #[test]
    fn test_primary_key_must_exist_and_be_keyable() {
        let missing = ObjectSchema::new("T").primary_key("nope");
        assert!(matches!(
            missing.validate(),
            Err(CoreError::InvalidPrimaryKey { .. })
        ));

        let bad_type = ObjectSchema::new("T")
            .property(Property::new("flag", PropertyType::Bool))
            .primary_key("flag");
        assert!(matches!(
            bad_type.validate(),
            Err(CoreError::InvalidPrimaryKey { .. })
        ));
    }

    #[test]
    fn test_double_index_rejected() {
        let schema =
            ObjectSchema::new("T").property(Property::new("score", PropertyType::Double).indexed());
        assert!(matches!(
            schema.validate(),
            Err(CoreError::UnindexableProperty { .. })
        ));
    }

    #[test]
    fn test_conform_fills_defaults_and_nulls() {
        let obj = Object::new().with("name", "ada");
        let conformed = person().conform(&obj).unwrap();

        assert_eq!(conformed.get_int("age"), Some(0));
        assert_eq!(conformed.get("email"), Some(&Value::Null));
    }

    #[test]
    fn test_conform_rejects_missing_required() {
        let obj = Object::new().with("age", 3i64);
        assert!(matches!(
            person().conform(&obj),
            Err(CoreError::MissingProperty { .. })
        ));
    }

    #[test]
    fn test_conform_rejects_type_mismatch() {
        let obj = Object::new().with("name", "ada").with("age", "old");
        assert!(matches!(
            person().conform(&obj),
            Err(CoreError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_conform_rejects_unknown_but_project_drops() {
        let obj = Object::new().with("name", "ada").with("legacy", 1i64);
        assert!(matches!(
            person().conform(&obj),
            Err(CoreError::UnknownProperty { .. })
        ));

        let projected = person().project(&obj).unwrap();
        assert!(!projected.contains("legacy"));
    }

    #[test]
    fn test_registry_default_schema_excludes_opted_out() {
        let mut registry = SchemaRegistry::new();
        registry.register(person());
        registry.register(
            ObjectSchema::new("Internal")
                .property(Property::new("x", PropertyType::Int))
                .exclude_from_default_schema(),
        );

        let default = registry.default_schema();
        assert!(default.contains("Person"));
        assert!(!default.contains("Internal"));

        let explicit = registry.schema_with(["Person", "Internal"]).unwrap();
        assert!(explicit.contains("Internal"));

        assert!(registry.schema_with(["Missing"]).is_err());
    }

    #[test]
    fn test_same_shape_ignores_default_membership() {
        let a = person();
        let b = person().exclude_from_default_schema();
        assert!(a.same_shape(&b));

        let c = person().property(Property::new("extra", PropertyType::Bool));
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn test_schema_serializes_to_json() {
        let schema = Schema::new(vec![person()]);
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
