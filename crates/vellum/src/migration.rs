//! Schema version migration.
//!
//! On open, the stored schema version is compared with the requested one:
//!
//! ```text
//! NeedsCheck ─┬─> UpToDate ───────────────────────────────> Opened
//!             ├─> NeedsMigration ─┬─> MigrationApplied ──> Opened
//!             │                   ├─> Deleted ───────────> Opened
//!             │                   └─> Rejected
//!             └─> Rejected (stored version is newer)
//! ```
//!
//! Every path that writes does so in a single write transaction. A failed
//! transform rolls back, so the store keeps its old version and contents.

use tracing::{debug, info, warn};
use vellum_core::{Object, ObjectKey, Schema};
use vellum_store::{ReadTransaction, Store, StoreExt, WriteTransaction};

use crate::config::ValidatedDescriptor;
use crate::error::{MigrationError, OpenError};

/// A step of the open-time state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    NeedsCheck,
    UpToDate,
    NeedsMigration,
    MigrationApplied,
    Deleted,
    Opened,
    Rejected,
}

/// What happened while opening a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// States passed through, in order.
    pub states: Vec<MigrationState>,
    /// Version found in the store. `None` for a fresh store.
    pub stored_version: Option<u64>,
    pub requested_version: u64,
    /// How many times the migration transform ran.
    pub transform_invocations: usize,
    /// The store was empty and has been initialized.
    pub created: bool,
    /// Object types added without a version change.
    pub added_types: Vec<String>,
}

impl MigrationReport {
    fn enter(&mut self, state: MigrationState) {
        debug!(?state, "migration state");
        self.states.push(state);
    }

    pub fn final_state(&self) -> Option<MigrationState> {
        self.states.last().copied()
    }
}

/// Access to stored objects during a migration transform.
///
/// Objects keep the shape they were stored with while the transform runs.
/// Afterwards every object is fitted to the new schema: new properties get
/// their defaults, removed properties are dropped, and an object that still
/// does not fit fails the migration.
pub struct Migration<'t> {
    txn: &'t mut dyn WriteTransaction,
    old_schema: Schema,
    new_schema: Schema,
}

impl<'t> Migration<'t> {
    fn new(txn: &'t mut dyn WriteTransaction, old_schema: Schema, new_schema: Schema) -> Self {
        Self {
            txn,
            old_schema,
            new_schema,
        }
    }

    /// The schema the store was written with.
    pub fn old_schema(&self) -> &Schema {
        &self.old_schema
    }

    /// The schema being migrated to.
    pub fn new_schema(&self) -> &Schema {
        &self.new_schema
    }

    /// Every object of a type, ordered by key.
    pub fn objects(&self, object_type: &str) -> Result<Vec<(ObjectKey, Object)>, MigrationError> {
        Ok(self.txn.scan(object_type)?)
    }

    /// Rewrite every object of a type in place.
    pub fn for_each<F>(&mut self, object_type: &str, mut f: F) -> Result<(), MigrationError>
    where
        F: FnMut(&mut Object) -> Result<(), MigrationError>,
    {
        for (key, mut object) in self.txn.scan(object_type)? {
            f(&mut object)?;
            self.txn.put_object(object_type, key, &object)?;
        }
        Ok(())
    }

    /// Rename a property on every object of a type.
    pub fn rename_property(
        &mut self,
        object_type: &str,
        from: &str,
        to: &str,
    ) -> Result<(), MigrationError> {
        self.for_each(object_type, |object| {
            object.rename(from, to);
            Ok(())
        })
    }

    /// Create an object. It is checked against the new schema afterwards.
    pub fn create(&mut self, object_type: &str, object: Object) -> Result<ObjectKey, MigrationError> {
        if self.txn.object_type(object_type)?.is_none() {
            let definition = self
                .new_schema
                .object_type(object_type)
                .ok_or_else(|| MigrationError::UnknownObjectType(object_type.to_string()))?;
            self.txn.put_object_type(definition)?;
        }
        Ok(self.txn.insert_unchecked(object_type, &object)?)
    }

    /// Delete one object. Returns whether it existed.
    pub fn delete(&mut self, object_type: &str, key: ObjectKey) -> Result<bool, MigrationError> {
        Ok(self.txn.delete(object_type, key)?)
    }

    /// Delete every object of a type.
    pub fn delete_all(&mut self, object_type: &str) -> Result<(), MigrationError> {
        for (key, _) in self.txn.scan(object_type)? {
            self.txn.remove_object(object_type, key)?;
        }
        self.txn.clear_index(object_type)?;
        Ok(())
    }

    /// Fit every object to the new schema, drop removed types, rebuild
    /// indexes and record the new version.
    fn finish(self, version: u64) -> Result<(), MigrationError> {
        for stored in self.txn.object_types()?.iter() {
            if !self.new_schema.contains(&stored.name) {
                debug!(object_type = %stored.name, "dropping object type");
                self.txn.remove_object_type(&stored.name)?;
            }
        }

        for definition in self.new_schema.iter() {
            self.txn.put_object_type(definition)?;
            for (key, object) in self.txn.scan(&definition.name)? {
                let fitted = definition
                    .project(&object)
                    .map_err(|e| MigrationError::InvalidObject {
                        object_type: definition.name.clone(),
                        reason: e.to_string(),
                    })?;
                self.txn.put_object(&definition.name, key, &fitted)?;
            }
            self.txn.reindex(&definition.name)?;
        }

        self.txn.set_schema_version(version)?;
        Ok(())
    }
}

/// Write `schema` into an empty (or emptied) store at `version`.
fn initialize(
    txn: &mut dyn WriteTransaction,
    schema: &Schema,
    version: u64,
) -> Result<(), MigrationError> {
    for definition in schema.iter() {
        txn.put_object_type(definition)?;
    }
    txn.set_schema_version(version)?;
    Ok(())
}

fn wipe(store: &dyn Store, descriptor: &ValidatedDescriptor) -> Result<(), OpenError> {
    warn!(location = %descriptor.location, "deleting store contents for schema change");
    store.write(|txn| {
        txn.clear()?;
        initialize(txn, &descriptor.schema, descriptor.schema_version)
    })?;
    Ok(())
}

fn reject(report: &mut MigrationReport, error: OpenError) -> Result<MigrationReport, OpenError> {
    report.enter(MigrationState::Rejected);
    warn!("open rejected: {}", error);
    Err(error)
}

/// Bring a freshly opened store to the requested version and schema.
pub(crate) fn migrate(
    store: &dyn Store,
    descriptor: &ValidatedDescriptor,
) -> Result<MigrationReport, OpenError> {
    let requested = descriptor.schema_version;
    let mut report = MigrationReport {
        requested_version: requested,
        ..MigrationReport::default()
    };
    report.enter(MigrationState::NeedsCheck);

    let (stored_version, stored_schema) = store.read(|txn| {
        Ok::<_, OpenError>((txn.schema_version()?, txn.object_types()?))
    })?;
    report.stored_version = stored_version;

    let Some(stored) = stored_version else {
        if descriptor.read_only {
            return reject(
                &mut report,
                OpenError::Rejected("read-only store has not been initialized".into()),
            );
        }
        store.write(|txn| initialize(txn, &descriptor.schema, requested))?;
        report.created = true;
        report.enter(MigrationState::UpToDate);
        report.enter(MigrationState::Opened);
        info!(location = %descriptor.location, version = requested, "created store");
        return Ok(report);
    };

    if stored > requested {
        return reject(
            &mut report,
            OpenError::SchemaVersionRegression { stored, requested },
        );
    }

    if stored == requested {
        let changed: Vec<&str> = descriptor
            .schema
            .iter()
            .filter(|target| {
                stored_schema
                    .object_type(&target.name)
                    .is_some_and(|existing| !existing.same_shape(target))
            })
            .map(|target| target.name.as_str())
            .collect();

        if !changed.is_empty() {
            report.enter(MigrationState::NeedsMigration);
            let reason = format!(
                "object types changed without a version change: {}",
                changed.join(", ")
            );
            return delete_or_reject(store, descriptor, &mut report, reason);
        }

        let added: Vec<String> = descriptor
            .schema
            .names()
            .filter(|name| !stored_schema.contains(name))
            .map(String::from)
            .collect();
        report.enter(MigrationState::UpToDate);

        if !added.is_empty() {
            if descriptor.read_only {
                return reject(
                    &mut report,
                    OpenError::Rejected(format!(
                        "read-only store lacks object types: {}",
                        added.join(", ")
                    )),
                );
            }
            store.write(|txn| {
                for name in &added {
                    if let Some(definition) = descriptor.schema.object_type(name) {
                        txn.put_object_type(definition)?;
                    }
                }
                Ok::<_, OpenError>(())
            })?;
            debug!(added = ?added, "added object types");
            report.added_types = added;
        }

        report.enter(MigrationState::Opened);
        return Ok(report);
    }

    report.enter(MigrationState::NeedsMigration);
    let Some(transform) = descriptor.migration.clone() else {
        let reason = format!(
            "version {} needs migration to {} and no transform was given",
            stored, requested
        );
        return delete_or_reject(store, descriptor, &mut report, reason);
    };
    if descriptor.read_only {
        return reject(
            &mut report,
            OpenError::Rejected(format!(
                "read-only store needs migration from version {} to {}",
                stored, requested
            )),
        );
    }

    info!(
        location = %descriptor.location,
        from = stored,
        to = requested,
        "running migration"
    );
    report.transform_invocations += 1;
    let result = store.write(|txn| {
        let mut migration = Migration::new(txn, stored_schema.clone(), descriptor.schema.clone());
        (*transform)(stored, requested, &mut migration)?;
        migration.finish(requested)
    });

    match result {
        Ok(()) => {
            report.enter(MigrationState::MigrationApplied);
            report.enter(MigrationState::Opened);
            Ok(report)
        }
        Err(e) => reject(&mut report, OpenError::Migration(e)),
    }
}

fn delete_or_reject(
    store: &dyn Store,
    descriptor: &ValidatedDescriptor,
    report: &mut MigrationReport,
    reason: String,
) -> Result<MigrationReport, OpenError> {
    if !descriptor.delete_if_migration_needed || descriptor.read_only {
        let error = OpenError::SchemaMismatch {
            stored: report.stored_version,
            requested: descriptor.schema_version,
            reason,
        };
        return reject(report, error);
    }

    wipe(store, descriptor)?;
    report.enter(MigrationState::Deleted);
    report.enter(MigrationState::Opened);
    Ok(report.clone())
}

/// Read the stored schema version without migrating.
pub(crate) fn stored_version(txn: &dyn ReadTransaction) -> Result<Option<u64>, OpenError> {
    Ok(txn.schema_version()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, Configuration};
    use vellum_core::{ObjectSchema, Property, PropertyType};
    use vellum_store::MemoryStore;

    fn person_v1() -> Schema {
        Schema::new(vec![ObjectSchema::new("Person")
            .property(Property::new("name", PropertyType::String))])
    }

    fn person_v2() -> Schema {
        Schema::new(vec![ObjectSchema::new("Person")
            .property(Property::new("full_name", PropertyType::String))
            .property(Property::new("age", PropertyType::Int).with_default(0i64))])
    }

    fn descriptor(config: Configuration) -> ValidatedDescriptor {
        resolve(&config).unwrap()
    }

    fn seeded(version: u64) -> MemoryStore {
        let store = MemoryStore::new();
        migrate(
            &store,
            &descriptor(Configuration::in_memory("t").schema(person_v1()).schema_version(version)),
        )
        .unwrap();
        store
            .write(|txn| txn.insert("Person", Object::new().with("name", "Ada")))
            .unwrap();
        store
    }

    #[test]
    fn test_fresh_store_created() {
        let store = MemoryStore::new();
        let report = migrate(
            &store,
            &descriptor(Configuration::in_memory("t").schema(person_v1()).schema_version(2)),
        )
        .unwrap();

        assert!(report.created);
        assert_eq!(
            report.states,
            vec![
                MigrationState::NeedsCheck,
                MigrationState::UpToDate,
                MigrationState::Opened
            ]
        );
        assert_eq!(store.read(stored_version).unwrap(), Some(2));
    }

    #[test]
    fn test_same_version_never_runs_transform() {
        let store = seeded(1);
        let config = Configuration::in_memory("t")
            .schema(person_v1())
            .schema_version(1)
            .migration(|_, _, _| Err(MigrationError::transform("must not run")));

        let report = migrate(&store, &descriptor(config)).unwrap();
        assert_eq!(report.transform_invocations, 0);
        assert_eq!(report.final_state(), Some(MigrationState::Opened));
    }

    #[test]
    fn test_transform_renames_and_fills_defaults() {
        let store = seeded(1);
        let config = Configuration::in_memory("t")
            .schema(person_v2())
            .schema_version(2)
            .migration(|old, new, migration| {
                assert_eq!((old, new), (1, 2));
                assert!(migration.old_schema().contains("Person"));
                migration.rename_property("Person", "name", "full_name")
            });

        let report = migrate(&store, &descriptor(config)).unwrap();
        assert_eq!(report.transform_invocations, 1);
        assert!(report.states.contains(&MigrationState::MigrationApplied));

        let people = store.read(|txn| txn.scan("Person")).unwrap();
        assert_eq!(people[0].1.get_str("full_name"), Some("Ada"));
        assert_eq!(people[0].1.get_int("age"), Some(0));
        assert!(!people[0].1.contains("name"));
    }

    #[test]
    fn test_failed_transform_keeps_old_version() {
        let store = seeded(1);
        let config = Configuration::in_memory("t")
            .schema(person_v2())
            .schema_version(2)
            .migration(|_, _, migration| {
                migration.rename_property("Person", "name", "full_name")?;
                Err(MigrationError::transform("boom"))
            });

        let result = migrate(&store, &descriptor(config));
        assert!(matches!(
            result,
            Err(OpenError::Migration(MigrationError::Transform(_)))
        ));

        assert_eq!(store.read(stored_version).unwrap(), Some(1));
        let people = store.read(|txn| txn.scan("Person")).unwrap();
        assert_eq!(people[0].1.get_str("name"), Some("Ada"));
    }

    #[test]
    fn test_non_conforming_object_fails_migration() {
        let store = seeded(1);
        // No rename: "full_name" is required and missing.
        let config = Configuration::in_memory("t")
            .schema(person_v2())
            .schema_version(2)
            .migration(|_, _, _| Ok(()));

        let result = migrate(&store, &descriptor(config));
        assert!(matches!(
            result,
            Err(OpenError::Migration(MigrationError::InvalidObject { .. }))
        ));
        assert_eq!(store.read(stored_version).unwrap(), Some(1));
    }

    #[test]
    fn test_regression_rejected_regardless_of_flags() {
        let store = seeded(5);
        let config = Configuration::in_memory("t")
            .schema(person_v1())
            .schema_version(4)
            .delete_if_migration_needed(true)
            .migration(|_, _, _| Ok(()));

        let result = migrate(&store, &descriptor(config));
        assert!(matches!(
            result,
            Err(OpenError::SchemaVersionRegression {
                stored: 5,
                requested: 4
            })
        ));
    }

    #[test]
    fn test_missing_transform_without_delete_is_mismatch() {
        let store = seeded(1);
        let config = Configuration::in_memory("t").schema(person_v2()).schema_version(2);

        let result = migrate(&store, &descriptor(config));
        assert!(matches!(result, Err(OpenError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_delete_if_migration_needed_wipes() {
        let store = seeded(1);
        let config = Configuration::in_memory("t")
            .schema(person_v2())
            .schema_version(2)
            .delete_if_migration_needed(true);

        let report = migrate(&store, &descriptor(config)).unwrap();
        assert!(report.states.contains(&MigrationState::Deleted));
        assert_eq!(store.read(|txn| txn.count("Person")).unwrap(), 0);
        assert_eq!(store.read(stored_version).unwrap(), Some(2));
    }

    #[test]
    fn test_additive_types_without_version_change() {
        let store = seeded(1);
        let schema = person_v1().with(
            ObjectSchema::new("Pet").property(Property::new("name", PropertyType::String)),
        );
        let config = Configuration::in_memory("t").schema(schema).schema_version(1);

        let report = migrate(&store, &descriptor(config)).unwrap();
        assert_eq!(report.added_types, vec!["Pet".to_string()]);
        assert!(store.read(|txn| txn.object_type("Pet")).unwrap().is_some());
        assert_eq!(store.read(|txn| txn.count("Person")).unwrap(), 1);
    }

    #[test]
    fn test_changed_type_without_version_change_is_mismatch() {
        let store = seeded(1);
        let config = Configuration::in_memory("t").schema(person_v2()).schema_version(1);

        let result = migrate(&store, &descriptor(config));
        assert!(matches!(result, Err(OpenError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_removed_types_dropped_by_migration() {
        let store = seeded(1);
        let pets = Schema::new(vec![
            ObjectSchema::new("Pet").property(Property::new("name", PropertyType::String))
        ]);
        let config = Configuration::in_memory("t")
            .schema(pets)
            .schema_version(2)
            .migration(|_, _, migration| {
                for (_, person) in migration.objects("Person")? {
                    let name = person.get_str("name").unwrap_or_default().to_string();
                    migration.create("Pet", Object::new().with("name", name))?;
                }
                Ok(())
            });

        migrate(&store, &descriptor(config)).unwrap();
        store
            .read(|txn| {
                assert!(txn.object_type("Person")?.is_none());
                assert_eq!(txn.count("Pet")?, 1);
                Ok::<_, vellum_store::StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn test_delete_and_delete_all() {
        let store = seeded(1);
        store
            .write(|txn| txn.insert("Person", Object::new().with("name", "Grace")))
            .unwrap();

        let config = Configuration::in_memory("t")
            .schema(person_v1())
            .schema_version(2)
            .migration(|_, _, migration| {
                let people = migration.objects("Person")?;
                assert_eq!(people.len(), 2);
                for (key, person) in people {
                    if person.get_str("name") == Some("Ada") {
                        assert!(migration.delete("Person", key)?);
                    }
                }
                assert_eq!(migration.objects("Person")?.len(), 1);
                migration.delete_all("Person")
            });

        migrate(&store, &descriptor(config)).unwrap();
        assert_eq!(store.read(|txn| txn.count("Person")).unwrap(), 0);
        assert_eq!(store.read(stored_version).unwrap(), Some(2));
    }
}
