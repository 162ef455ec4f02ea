//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
pub fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply a list of statements atomically
fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: record stores and mutation queue
fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS animals (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                species TEXT NOT NULL,
                breed TEXT NOT NULL,
                date_of_birth TEXT NOT NULL,
                weight REAL NOT NULL,
                color TEXT NOT NULL DEFAULT '',
                medical_history TEXT NOT NULL DEFAULT '',
                vaccinations TEXT NOT NULL DEFAULT '[]',
                last_checkup TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_animals_synced ON animals(synced)",
            "CREATE TABLE IF NOT EXISTS care_records (
                id TEXT PRIMARY KEY,
                animal_id TEXT NOT NULL,
                care_type TEXT NOT NULL,
                date TEXT NOT NULL,
                notes TEXT NOT NULL DEFAULT '',
                next_due TEXT,
                completed_by TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_care_records_synced ON care_records(synced)",
            // Append-only log of local intent; seq preserves append order
            "CREATE TABLE IF NOT EXISTS mutations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                action TEXT NOT NULL,
                record_id TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_mutations_record ON mutations(kind, record_id)",
        ],
    )
}

/// Migration to version 2: per-animal care lookup and sync bookkeeping
fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE INDEX IF NOT EXISTS idx_care_records_animal ON care_records(animal_id)",
            "CREATE TABLE IF NOT EXISTS sync_state (
                kind TEXT NOT NULL,
                record_id TEXT NOT NULL,
                remote_id TEXT,
                in_flight_since INTEGER,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                blocked_reason TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (kind, record_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_state_blocked ON sync_state(blocked_reason)",
        ],
    )
}
