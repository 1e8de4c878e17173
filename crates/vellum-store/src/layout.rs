//! On-disk layout of the SQLite engine.
//!
//! The engine's own tables are versioned independently of the application
//! schema version. Each layout migration is a SQL batch that moves the
//! layout from version N to N+1. Application schema versions live in
//! `vellum_metadata` and are handled by the migrator, not here.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, StoreError};

/// Current layout version.
pub const CURRENT_VERSION: u32 = 1;

/// Metadata key of the application schema version.
pub(crate) const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Metadata key of the encryption key check value.
pub(crate) const KEY_CHECK_KEY: &str = "key_check";

/// Initialize or upgrade the layout.
///
/// Idempotent. All pending steps run in one transaction.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current = layout_version(conn)?;
    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "store layout v{} is newer than supported v{}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, vellum_core::now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Check a layout that cannot be upgraded (read-only opens).
pub fn verify(conn: &Connection) -> Result<()> {
    let has_table: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='schema_migrations'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_table.is_none() {
        return Err(StoreError::Uninitialized);
    }

    match layout_version(conn)? {
        0 => Err(StoreError::Uninitialized),
        CURRENT_VERSION => Ok(()),
        other => Err(StoreError::Migration(format!(
            "store layout v{} cannot be opened read-only by layout v{}",
            other, CURRENT_VERSION
        ))),
    }
}

fn layout_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown layout version: {}",
            version
        ))),
    }
}

/// Layout v1: metadata, type definitions, objects, indexes.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Store-wide values: schema version, key check
        CREATE TABLE vellum_metadata (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );

        -- One row per object type
        CREATE TABLE vellum_object_types (
            name TEXT PRIMARY KEY,
            definition TEXT NOT NULL,          -- ObjectSchema as JSON
            next_key INTEGER NOT NULL DEFAULT 1
        );

        -- Objects, CBOR encoded, sealed when the store is encrypted
        CREATE TABLE vellum_objects (
            object_type TEXT NOT NULL,
            object_key INTEGER NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (object_type, object_key)
        );

        -- Primary key and secondary index rows
        CREATE TABLE vellum_index (
            object_type TEXT NOT NULL,
            property TEXT NOT NULL,
            index_key BLOB NOT NULL,           -- encoded value, or keyed hash
            object_key INTEGER NOT NULL,
            PRIMARY KEY (object_type, property, index_key, object_key)
        );

        CREATE INDEX idx_index_object ON vellum_index(object_type, object_key);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"vellum_metadata".to_string()));
        assert!(tables.contains(&"vellum_object_types".to_string()));
        assert!(tables.contains(&"vellum_objects".to_string()));
        assert!(tables.contains(&"vellum_index".to_string()));
        assert!(tables.contains(&"schema_migrations".to_string()));
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        assert_eq!(layout_version(&conn).unwrap(), CURRENT_VERSION);
        verify(&conn).unwrap();
    }

    #[test]
    fn test_verify_uninitialized() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(verify(&conn), Err(StoreError::Uninitialized)));
    }

    #[test]
    fn test_newer_layout_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
