//! Schema migrations for SQLite session databases.
//!
//! Each migration is a function taking the schema from version N to N+1.
//! The applied versions are recorded in `schema_migrations`; a database with
//! no such table is at version 0 and needs an upgrade.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Schema version of an open database, without modifying it.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(0);
    }

    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Bring the schema up to [`CURRENT_VERSION`], creating the record table
/// `container`.
///
/// Idempotent: running it on an up-to-date database does nothing.
pub fn migrate(conn: &mut Connection, container: &str) -> Result<()> {
    if !is_identifier(container) {
        return Err(StoreError::Migration(format!(
            "invalid container name: {:?}",
            container
        )));
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current = current_version(conn)?;
    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version, container)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// True if `name` is safe to splice into SQL as a table name.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn apply_migration(conn: &Connection, version: u32, container: &str) -> Result<()> {
    match version {
        1 => apply_v1(conn, container),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: the record table, keyed by raw key.
fn apply_v1(conn: &Connection, container: &str) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE "{container}" (
            key TEXT PRIMARY KEY,   -- raw key, e.g. "profile.0"
            value TEXT NOT NULL     -- JSON record body, opaque to the driver
        );
        "#
    ))?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
