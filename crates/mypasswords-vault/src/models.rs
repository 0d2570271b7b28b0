//! Vault records

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Folder grouping password entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Folder ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Optional `#RRGGBB` color
    pub color_hex: Option<String>,
}

impl Folder {
    /// New folder with a fresh ID
    pub fn new(name: impl Into<String>, color_hex: Option<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            color_hex,
        }
    }
}

/// Password entry (a site or service)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordEntry {
    /// Entry ID
    pub id: String,
    /// Title
    pub title: String,
    /// Containing folder, `None` for root entries
    pub folder_id: Option<String>,
}

impl PasswordEntry {
    /// New entry with a fresh ID
    pub fn new(title: impl Into<String>, folder_id: Option<String>) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            folder_id,
        }
    }
}

/// Username/password pair belonging to an entry.
///
/// `password` is plaintext in memory only; the repository encrypts it before
/// it reaches the database. The value is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Credential ID
    pub id: String,
    /// Owning entry
    pub entry_id: String,
    /// Username (stored as plaintext)
    pub username: String,
    /// Password
    pub password: String,
}

impl Credential {
    /// New credential with a fresh ID
    pub fn new(
        entry_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            entry_id: entry_id.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("entry_id", &self.entry_id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Entry together with its credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordEntryWithCredentials {
    /// Entry
    pub entry: PasswordEntry,
    /// Credentials, in insertion order
    pub credentials: Vec<Credential>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = Credential::new("entry", "alice", "hunter2");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(Folder::new("a", None).id, Folder::new("a", None).id);
    }
}
