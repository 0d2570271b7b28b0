//! Data access layer
//!
//! Passwords are encrypted with [`CredentialCipher`] before they are bound to
//! a statement and decrypted after rows are read. Every other column is
//! stored as-is inside the encrypted database.

use crate::bootstrap::VaultHandle;
use crate::cipher::CredentialCipher;
use crate::models::*;
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// Repository for vault records
#[derive(Clone)]
pub struct Repository {
    handle: VaultHandle,
    cipher: CredentialCipher,
}

struct StoredCredential {
    id: String,
    entry_id: String,
    username: String,
    password: String,
}

impl Repository {
    /// Create repository over an opened vault
    pub fn new(handle: VaultHandle, cipher: CredentialCipher) -> Self {
        Self { handle, cipher }
    }

    /// Insert or update a folder
    pub fn save_folder(&self, folder: &Folder) -> Result<()> {
        if folder.name.trim().is_empty() {
            return Err(Error::Validation("folder name must not be empty".to_string()));
        }

        self.handle.conn().execute(
            "INSERT INTO folders (id, name, color_hex) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, color_hex = excluded.color_hex",
            params![folder.id, folder.name, folder.color_hex],
        )?;
        Ok(())
    }

    /// Get folder by ID
    pub fn folder(&self, id: &str) -> Result<Option<Folder>> {
        let folder = self
            .handle
            .conn()
            .query_row(
                "SELECT id, name, color_hex FROM folders WHERE id = ?1",
                [id],
                |row| {
                    Ok(Folder {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        color_hex: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(folder)
    }

    /// All folders ordered by name
    pub fn all_folders(&self) -> Result<Vec<Folder>> {
        let conn = self.handle.conn();
        let mut stmt =
            conn.prepare("SELECT id, name, color_hex FROM folders ORDER BY name COLLATE NOCASE, id")?;

        let folders = stmt
            .query_map([], |row| {
                Ok(Folder {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    color_hex: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<Folder>, rusqlite::Error>>()?;

        Ok(folders)
    }

    /// Delete a folder. Its entries move to the root.
    pub fn delete_folder(&self, id: &str) -> Result<()> {
        let deleted = self
            .handle
            .conn()
            .execute("DELETE FROM folders WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("folder {}", id)));
        }
        Ok(())
    }

    /// Save an entry and replace its credentials in one transaction
    pub fn save_entry_with_credentials(
        &self,
        entry: &PasswordEntry,
        credentials: &[Credential],
    ) -> Result<()> {
        if entry.title.trim().is_empty() {
            return Err(Error::Validation("entry title must not be empty".to_string()));
        }
        if let Some(stray) = credentials.iter().find(|c| c.entry_id != entry.id) {
            return Err(Error::Validation(format!(
                "credential {} belongs to entry {}, not {}",
                stray.id, stray.entry_id, entry.id
            )));
        }

        // Encrypt before taking the connection lock
        let encrypted = credentials
            .iter()
            .map(|c| -> Result<_> { Ok((c, self.cipher.encrypt_text(&c.password)?)) })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.handle.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO password_entries (id, title, folder_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, folder_id = excluded.folder_id",
            params![entry.id, entry.title, entry.folder_id],
        )?;
        tx.execute("DELETE FROM credentials WHERE entry_id = ?1", [&entry.id])?;
        for (credential, password) in &encrypted {
            tx.execute(
                "INSERT INTO credentials (id, entry_id, username, password) VALUES (?1, ?2, ?3, ?4)",
                params![credential.id, credential.entry_id, credential.username, password],
            )?;
        }
        tx.commit()?;

        tracing::debug!(entry_id = %entry.id, credentials = encrypted.len(), "Saved entry");
        Ok(())
    }

    /// Update entry title and folder
    pub fn update_entry(&self, entry: &PasswordEntry) -> Result<()> {
        let updated = self.handle.conn().execute(
            "UPDATE password_entries SET title = ?1, folder_id = ?2 WHERE id = ?3",
            params![entry.title, entry.folder_id, entry.id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("entry {}", entry.id)));
        }
        Ok(())
    }

    /// Entry with decrypted credentials
    pub fn entry_with_credentials(&self, id: &str) -> Result<Option<PasswordEntryWithCredentials>> {
        let (entry, stored) = {
            let conn = self.handle.conn();
            let entry = conn
                .query_row(
                    "SELECT id, title, folder_id FROM password_entries WHERE id = ?1",
                    [id],
                    entry_from_row,
                )
                .optional()?;
            let Some(entry) = entry else {
                return Ok(None);
            };
            let stored = load_credentials(&conn, id)?;
            (entry, stored)
        };

        Ok(Some(self.decrypt_entry(entry, stored)?))
    }

    /// Entries not in any folder with decrypted credentials, ordered by title
    pub fn root_entries(&self) -> Result<Vec<PasswordEntryWithCredentials>> {
        self.query_entries(
            "SELECT id, title, folder_id FROM password_entries
             WHERE folder_id IS NULL ORDER BY title COLLATE NOCASE, id",
            params![],
        )
    }

    /// Entries in a folder with decrypted credentials, ordered by title
    pub fn entries_in_folder(&self, folder_id: &str) -> Result<Vec<PasswordEntryWithCredentials>> {
        self.query_entries(
            "SELECT id, title, folder_id FROM password_entries
             WHERE folder_id = ?1 ORDER BY title COLLATE NOCASE, id",
            params![folder_id],
        )
    }

    /// Delete an entry and its credentials
    pub fn delete_entry(&self, id: &str) -> Result<()> {
        let deleted = self
            .handle
            .conn()
            .execute("DELETE FROM password_entries WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(Error::NotFound(format!("entry {}", id)));
        }
        Ok(())
    }

    /// Remove every folder, entry and credential
    pub fn delete_all_data(&self) -> Result<()> {
        let mut conn = self.handle.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM credentials", [])?;
        tx.execute("DELETE FROM password_entries", [])?;
        tx.execute("DELETE FROM folders", [])?;
        tx.commit()?;

        tracing::info!("Deleted all vault data");
        Ok(())
    }

    // Rows are read under one connection lock; decryption runs after it is
    // released.
    fn query_entries(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<PasswordEntryWithCredentials>> {
        let rows = {
            let conn = self.handle.conn();
            let mut stmt = conn.prepare(sql)?;
            let entries = stmt
                .query_map(params, entry_from_row)?
                .collect::<std::result::Result<Vec<PasswordEntry>, rusqlite::Error>>()?;

            let mut rows = Vec::with_capacity(entries.len());
            for entry in entries {
                let stored = load_credentials(&conn, &entry.id)?;
                rows.push((entry, stored));
            }
            rows
        };

        rows.into_iter()
            .map(|(entry, stored)| self.decrypt_entry(entry, stored))
            .collect()
    }

    fn decrypt_entry(
        &self,
        entry: PasswordEntry,
        stored: Vec<StoredCredential>,
    ) -> Result<PasswordEntryWithCredentials> {
        let credentials = stored
            .into_iter()
            .map(|c| self.decrypt_credential(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(PasswordEntryWithCredentials { entry, credentials })
    }

    fn decrypt_credential(&self, stored: StoredCredential) -> Result<Credential> {
        let password = self.cipher.decrypt_text(&stored.password).map_err(|e| {
            tracing::warn!(credential_id = %stored.id, error = %e, "Credential decryption failed");
            e
        })?;

        Ok(Credential {
            id: stored.id,
            entry_id: stored.entry_id,
            username: stored.username,
            password: password.as_str().to_owned(),
        })
    }
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PasswordEntry> {
    Ok(PasswordEntry {
        id: row.get(0)?,
        title: row.get(1)?,
        folder_id: row.get(2)?,
    })
}

fn load_credentials(conn: &Connection, entry_id: &str) -> Result<Vec<StoredCredential>> {
    let mut stmt = conn.prepare(
        "SELECT id, entry_id, username, password FROM credentials
         WHERE entry_id = ?1 ORDER BY rowid",
    )?;

    let rows = stmt
        .query_map([entry_id], |row| {
            Ok(StoredCredential {
                id: row.get(0)?,
                entry_id: row.get(1)?,
                username: row.get(2)?,
                password: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<StoredCredential>, rusqlite::Error>>()?;

    Ok(rows)
}
