//! Proptest generators for property-based testing.

use proptest::prelude::*;

use vellum_core::{Object, ObjectSchema, Property, PropertyType, Value};
use vellum_perms::{
    PermissionChange, PermissionKind, PermissionMeta, PermissionOffer, PermissionRecord,
    PermissionRequest,
};

/// Generate a property or object type name.
pub fn name() -> impl Strategy<Value = String> {
    "[a-z][a-zA-Z0-9_]{0,15}".prop_map(String::from)
}

/// Generate a property type.
pub fn property_type() -> impl Strategy<Value = PropertyType> {
    prop_oneof![
        Just(PropertyType::Bool),
        Just(PropertyType::Int),
        Just(PropertyType::Double),
        Just(PropertyType::String),
        Just(PropertyType::Bytes),
        Just(PropertyType::Timestamp),
    ]
}

/// Generate a reasonable timestamp in Unix milliseconds.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate a non-null value of `kind`.
pub fn value_of(kind: PropertyType) -> BoxedStrategy<Value> {
    match kind {
        PropertyType::Bool => any::<bool>().prop_map(Value::Bool).boxed(),
        PropertyType::Int => any::<i64>().prop_map(Value::Int).boxed(),
        PropertyType::Double => (-1.0e12f64..1.0e12).prop_map(Value::Double).boxed(),
        PropertyType::String => ".{0,24}".prop_map(Value::String).boxed(),
        PropertyType::Bytes => prop::collection::vec(any::<u8>(), 0..=32)
            .prop_map(Value::from)
            .boxed(),
        PropertyType::Timestamp => timestamp().prop_map(Value::Timestamp).boxed(),
    }
}

/// Generate any value, null included.
pub fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        6 => property_type().prop_flat_map(value_of),
    ]
}

/// Generate an object type with 1 to 6 distinctly named properties.
pub fn object_schema() -> impl Strategy<Value = ObjectSchema> {
    (
        name(),
        prop::collection::btree_map(name(), (property_type(), any::<bool>()), 1..=6),
    )
        .prop_map(|(type_name, properties)| {
            properties
                .into_iter()
                .fold(ObjectSchema::new(type_name), |schema, (property, (kind, optional))| {
                    let property = Property::new(property, kind);
                    schema.property(if optional { property.optional() } else { property })
                })
        })
}

/// Generate an object that conforms to `schema`.
pub fn object_for(schema: &ObjectSchema) -> BoxedStrategy<Object> {
    let fields: Vec<BoxedStrategy<(String, Value)>> = schema
        .properties
        .iter()
        .map(|property| {
            let name = property.name.clone();
            let value = if property.optional {
                prop_oneof![1 => Just(Value::Null), 3 => value_of(property.kind)].boxed()
            } else {
                value_of(property.kind)
            };
            value.prop_map(move |value| (name.clone(), value)).boxed()
        })
        .collect();

    fields
        .prop_map(|pairs| pairs.into_iter().collect::<Object>())
        .boxed()
}

/// Generate an object type together with a conforming object.
pub fn schema_and_object() -> impl Strategy<Value = (ObjectSchema, Object)> {
    object_schema().prop_flat_map(|schema| {
        let object = object_for(&schema);
        (Just(schema), object)
    })
}

/// Generate an offer token.
pub fn token() -> impl Strategy<Value = String> {
    "[a-f0-9]{32}".prop_map(String::from)
}

/// Generate a permission kind.
pub fn permission_kind() -> impl Strategy<Value = PermissionKind> {
    prop_oneof![
        Just(PermissionKind::Change),
        Just(PermissionKind::Offer),
        Just(PermissionKind::Request),
    ]
}

/// Generate a status code as written by an authority, or none.
pub fn status_code() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        Just(None),
        Just(Some(0)),
        (1i64..=4).prop_map(Some),
        any::<i64>().prop_map(Some),
    ]
}

/// Generate unprocessed metadata.
pub fn meta() -> impl Strategy<Value = PermissionMeta> {
    timestamp().prop_map(PermissionMeta::at)
}

fn optional_bool() -> impl Strategy<Value = Option<bool>> {
    prop::option::of(any::<bool>())
}

fn realm_url() -> impl Strategy<Value = String> {
    "realms://[a-z]{1,12}\\.example/~/[a-z]{1,12}".prop_map(String::from)
}

/// Generate an unprocessed permission change.
pub fn permission_change() -> impl Strategy<Value = PermissionChange> {
    (
        meta(),
        realm_url(),
        "[a-z]{1,12}",
        optional_bool(),
        optional_bool(),
        optional_bool(),
    )
        .prop_map(|(meta, realm_url, user_id, may_read, may_write, may_manage)| {
            PermissionChange {
                meta,
                realm_url,
                user_id,
                may_read,
                may_write,
                may_manage,
            }
        })
}

/// Generate an unprocessed permission offer without a token.
pub fn permission_offer() -> impl Strategy<Value = PermissionOffer> {
    (
        meta(),
        realm_url(),
        any::<(bool, bool, bool)>(),
        prop::option::of(timestamp()),
    )
        .prop_map(|(meta, realm_url, (may_read, may_write, may_manage), expires_at)| {
            PermissionOffer {
                meta,
                token: String::new(),
                realm_url,
                may_read,
                may_write,
                may_manage,
                expires_at,
            }
        })
}

/// Generate an unprocessed permission request.
pub fn permission_request() -> impl Strategy<Value = PermissionRequest> {
    (meta(), prop::option::of(token()))
        .prop_map(|(meta, token)| PermissionRequest { meta, token })
}

/// Generate any unprocessed permission record.
pub fn permission_record() -> impl Strategy<Value = PermissionRecord> {
    prop_oneof![
        permission_change().prop_map(PermissionRecord::from),
        permission_offer().prop_map(PermissionRecord::from),
        permission_request().prop_map(PermissionRecord::from),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_perms::{schema_for, PermissionStatus};

    proptest! {
        #[test]
        fn generated_objects_conform(pair in schema_and_object()) {
            let (schema, object) = pair;
            prop_assert!(schema.conform(&object).is_ok());
        }

        #[test]
        fn generated_values_match_kind(
            (kind, value) in property_type().prop_flat_map(|kind| (Just(kind), value_of(kind)))
        ) {
            prop_assert_eq!(value.kind(), Some(kind));
        }

        #[test]
        fn status_code_decides_processing(code in status_code()) {
            prop_assert_eq!(PermissionStatus::from_code(code).is_processed(), code.is_some());
        }

        #[test]
        fn generated_records_conform_to_their_schema(record in permission_record()) {
            let schema = schema_for(record.kind());
            prop_assert!(schema.conform(&record.to_object()).is_ok());
            prop_assert_eq!(record.status(), PermissionStatus::NotProcessed);
        }
    }
}
