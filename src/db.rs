//! Local SQLite settings database.
//!
//! Uses rusqlite with WAL mode. Holds the `local_settings` category/key/value
//! table the SQLite credential backend persists tokens into.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

use crate::error::Result;

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Open (or create) the settings database at `path`.
///
/// Creates the parent directory if needed, sets pragmas, and runs pending
/// migrations. On open failure, deletes the file and retries once.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| crate::AdapterError::Storage(format!("Failed to create data dir: {e}")))?;
    }
    info!("Opening settings database at {}", path.display());

    let conn = match open_and_configure(path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if path.exists() {
                let _ = fs::remove_file(path);
                let _ = fs::remove_file(path.with_extension("db-wal"));
                let _ = fs::remove_file(path.with_extension("db-shm"));
            }
            open_and_configure(path)?
        }
    };

    run_migrations(&conn)?;
    Ok(conn)
}

/// In-memory database with the schema applied.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    run_migrations(&conn)?;
    Ok(conn)
}

fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating settings database from v{current} to v{CURRENT_SCHEMA_VERSION}");
    if current < 1 {
        migrate_v1(conn)?;
    }
    Ok(())
}

/// Migration v1: category/key/value settings store.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        e
    })?;
    Ok(())
}

pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
            params![category, key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )?;
    Ok(())
}
