//! Open-time schema migration against on-disk stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use vellum::core::Object;
use vellum::store::StoreError;
use vellum::{schema_version_at, Database, MigrationError, MigrationState, OpenError};
use vellum_testkit::{
    record_migration, record_schema_v3, record_schema_v4, record_schema_v5, TempStore, RECORD_TYPE,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn seed_v3(temp: &TempStore, values: &[&str]) {
    let db = Database::open(&temp.config().schema(record_schema_v3()).schema_version(3)).unwrap();
    db.write(|txn| {
        for value in values {
            txn.insert(RECORD_TYPE, Object::new().with("A", *value))?;
        }
        Ok::<_, StoreError>(())
    })
    .unwrap();
}

fn records(db: &Database) -> Vec<Object> {
    db.read(|txn| txn.scan(RECORD_TYPE))
        .unwrap()
        .into_iter()
        .map(|(_, object)| object)
        .collect()
}

#[test]
fn test_three_to_five_renames_and_adds_field() {
    init_tracing();
    let temp = TempStore::new();
    seed_v3(&temp, &["x", "hello"]);

    let db = Database::open(
        &temp
            .config()
            .schema(record_schema_v5())
            .schema_version(5)
            .migration(record_migration),
    )
    .unwrap();

    let report = db.migration_report();
    assert_eq!(report.stored_version, Some(3));
    assert_eq!(report.transform_invocations, 1);
    assert_eq!(
        report.states,
        vec![
            MigrationState::NeedsCheck,
            MigrationState::NeedsMigration,
            MigrationState::MigrationApplied,
            MigrationState::Opened,
        ]
    );

    let records = records(&db);
    assert_eq!(records.len(), 2);
    for record in &records {
        assert!(!record.contains("A"));
        let b = record.get_str("B").unwrap();
        assert_eq!(record.get_int("C"), Some(b.len() as i64));
    }
    drop(db);

    assert_eq!(schema_version_at(&temp.config()).unwrap(), Some(5));
}

#[test]
fn test_transform_sees_stored_and_requested_versions() {
    let temp = TempStore::new();
    seed_v3(&temp, &["a"]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    Database::open(
        &temp
            .config()
            .schema(record_schema_v4())
            .schema_version(4)
            .migration(move |old, new, migration| {
                recorder.lock().unwrap().push((old, new));
                migration.rename_property(RECORD_TYPE, "A", "B")
            }),
    )
    .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![(3, 4)]);
}

#[test]
fn test_failed_transform_leaves_store_untouched() {
    let temp = TempStore::new();
    seed_v3(&temp, &["keep"]);

    let result = Database::open(
        &temp
            .config()
            .schema(record_schema_v5())
            .schema_version(5)
            .migration(|old, new, migration| {
                record_migration(old, new, migration)?;
                Err(MigrationError::transform("abort after rewriting"))
            }),
    );
    assert!(matches!(
        result,
        Err(OpenError::Migration(MigrationError::Transform(_)))
    ));

    assert_eq!(schema_version_at(&temp.config()).unwrap(), Some(3));
    let db = Database::open(&temp.config().schema(record_schema_v3()).schema_version(3)).unwrap();
    let records = records(&db);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get_str("A"), Some("keep"));
    assert!(!records[0].contains("B"));
}

#[test]
fn test_same_version_never_invokes_transform() {
    let temp = TempStore::new();
    seed_v3(&temp, &["a", "b"]);

    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let counter = Arc::clone(&calls);
        let db = Database::open(
            &temp
                .config()
                .schema(record_schema_v3())
                .schema_version(3)
                .migration(move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        )
        .unwrap();
        assert_eq!(db.migration_report().final_state(), Some(MigrationState::Opened));
        assert_eq!(db.migration_report().transform_invocations, 0);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_transform_without_delete_flag_rejected() {
    let temp = TempStore::new();
    seed_v3(&temp, &["a"]);

    let result = Database::open(&temp.config().schema(record_schema_v4()).schema_version(4));
    assert!(matches!(
        result,
        Err(OpenError::SchemaMismatch {
            stored: Some(3),
            requested: 4,
            ..
        })
    ));
    assert_eq!(schema_version_at(&temp.config()).unwrap(), Some(3));
}

#[test]
fn test_delete_flag_wipes_and_recreates() {
    let temp = TempStore::new();
    seed_v3(&temp, &["a", "b", "c"]);

    let db = Database::open(
        &temp
            .config()
            .schema(record_schema_v4())
            .schema_version(4)
            .delete_if_migration_needed(true),
    )
    .unwrap();

    assert!(db
        .migration_report()
        .states
        .contains(&MigrationState::Deleted));
    assert!(records(&db).is_empty());

    db.write(|txn| txn.insert(RECORD_TYPE, Object::new().with("B", "fresh")))
        .unwrap();
    assert_eq!(records(&db).len(), 1);
}

#[test]
fn test_transform_wins_over_delete_flag() {
    let temp = TempStore::new();
    seed_v3(&temp, &["kept"]);

    let db = Database::open(
        &temp
            .config()
            .schema(record_schema_v4())
            .schema_version(4)
            .delete_if_migration_needed(true)
            .migration(record_migration),
    )
    .unwrap();

    assert_eq!(records(&db)[0].get_str("B"), Some("kept"));
}

#[test]
fn test_transform_step_without_handler_rejected() {
    let temp = TempStore::new();
    seed_v3(&temp, &["a"]);

    let result = Database::open(
        &temp
            .config()
            .schema(record_schema_v5())
            .schema_version(6)
            .migration(record_migration),
    );
    assert!(matches!(result, Err(OpenError::Migration(_))));
    assert_eq!(schema_version_at(&temp.config()).unwrap(), Some(3));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_older_requested_version_always_rejected(
        stored in 1u64..1_000,
        behind in 1u64..1_000,
        delete in any::<bool>(),
        with_transform in any::<bool>(),
    ) {
        let requested = stored.saturating_sub(behind);
        let temp = TempStore::new();
        drop(Database::open(&temp.config().schema(record_schema_v3()).schema_version(stored)).unwrap());

        let mut config = temp
            .config()
            .schema(record_schema_v3())
            .schema_version(requested)
            .delete_if_migration_needed(delete);
        if with_transform {
            config = config.migration(|_, _, _| Ok(()));
        }

        let result = Database::open(&config);
        let rejected = matches!(
            result,
            Err(OpenError::SchemaVersionRegression { stored: s, requested: r }) if s == stored && r == requested
        );
        prop_assert!(rejected);
        prop_assert_eq!(schema_version_at(&temp.config()).unwrap(), Some(stored));
    }
}
