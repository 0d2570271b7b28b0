//! Encrypted database connection

use crate::error::StoreOpenError;
use crate::migrations;
use crate::passphrase::Passphrase;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// SQLCipher database connection
pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database keyed with `passphrase`.
    ///
    /// A wrong passphrase fails here; a connection is never returned for a
    /// database it cannot read.
    pub fn open<P: AsRef<Path>>(path: P, passphrase: &Passphrase) -> Result<Self, StoreOpenError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // PRAGMA key must be the first statement on the connection, otherwise
        // SQLCipher creates a plaintext database.
        let key_hex = Zeroizing::new(hex::encode(passphrase.as_bytes()));
        let key_pragma = Zeroizing::new(format!("PRAGMA key = \"x'{}'\";", key_hex.as_str()));
        conn.execute_batch(&key_pragma)
            .map_err(|e| StoreOpenError::Encryption(format!("Failed to set database key: {}", e)))?;

        match conn.query_row("PRAGMA cipher_version", [], |row| row.get::<_, String>(0)) {
            Ok(version) if !version.is_empty() => {
                tracing::debug!("SQLCipher version: {}", version);
            }
            _ => {
                return Err(StoreOpenError::Encryption(
                    "SQLCipher is not available; refusing to open an unencrypted database"
                        .to_string(),
                ));
            }
        }

        // The key is only checked on first page access.
        if let Err(e) = conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        }) {
            tracing::warn!(path = %path.display(), error = %e, "Database rejected passphrase");
            return Err(StoreOpenError::Encryption(
                "cannot read database; wrong passphrase or corrupted file".to_string(),
            ));
        }

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_migrations(&conn)?;

        tracing::info!(path = %path.display(), "Opened encrypted database");

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Lock the connection
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Opens the encrypted store with a passphrase
pub trait StorageEngine: Send + Sync {
    /// Open the store. A wrong passphrase is an error, never a partial open.
    fn open(&self, passphrase: &Passphrase) -> Result<Database, StoreOpenError>;
}

/// SQLCipher database at a fixed path
#[derive(Debug, Clone)]
pub struct SqlCipherEngine {
    path: PathBuf,
}

impl SqlCipherEngine {
    /// Engine for the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageEngine for SqlCipherEngine {
    fn open(&self, passphrase: &Passphrase) -> Result<Database, StoreOpenError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreOpenError::Encryption(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Database::open(&self.path, passphrase)
    }
}
