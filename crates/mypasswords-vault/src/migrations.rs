//! Database schema migrations

use crate::error::StoreOpenError;
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

type Result<T> = std::result::Result<T, StoreOpenError>;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version != SCHEMA_VERSION {
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Highest applied schema version, 0 for a fresh database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let has_table: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version')",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(0);
    }

    let version: Option<i32> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    if inserted > 0 {
        tracing::debug!("Inserted schema version {}", version);
    }
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE folders (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            color_hex TEXT
        );

        CREATE TABLE password_entries (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            folder_id TEXT REFERENCES folders(id) ON DELETE SET NULL
        );

        -- password holds base64(nonce || ciphertext || tag), never plaintext
        CREATE TABLE credentials (
            id TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL REFERENCES password_entries(id) ON DELETE CASCADE,
            username TEXT NOT NULL,
            password TEXT NOT NULL
        );

        CREATE INDEX idx_credentials_entry ON credentials(entry_id);
        "#,
    )
    .map_err(|e| StoreOpenError::Migration(e.to_string()))?;

    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_entries_folder ON password_entries(folder_id);
        "#,
    )
    .map_err(|e| StoreOpenError::Migration(e.to_string()))?;

    Ok(())
}
