//! Durable client storage for session credentials.
//!
//! The token store only needs a string key/value surface, so persistence is
//! a small trait with three backends: the OS credential store (Keychain,
//! DPAPI or Secret Service via `keyring`), the SQLite `local_settings` table,
//! and a process-local map for tests and ephemeral sessions.

use keyring::Entry;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use crate::db;
use crate::error::Result;

/// Storage key of the access token.
pub const KEY_ACCESS_TOKEN: &str = "backend_access_token";
/// Storage key of the refresh token.
pub const KEY_REFRESH_TOKEN: &str = "backend_refresh_token";

const KEYRING_SERVICE: &str = "retail-backend-adapter";
const SETTINGS_CATEGORY: &str = "session";

pub trait CredentialStorage: Send + Sync {
    /// Read a value. Missing entries and unreadable entries both yield `None`.
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Remove a value. Succeeds when the entry does not exist.
    fn delete(&self, key: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

pub struct KeyringStorage {
    service: String,
}

impl KeyringStorage {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }
}

impl Default for KeyringStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStorage for KeyringStorage {
    fn get(&self, key: &str) -> Option<String> {
        let entry = match Entry::new(&self.service, key) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => Some(pw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to read credential");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let entry = Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let entry = Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// SQLite local_settings
// ---------------------------------------------------------------------------

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(db::open(path)?),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(db::open_in_memory()?),
        })
    }
}

impl CredentialStorage for SqliteStorage {
    fn get(&self, key: &str) -> Option<String> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        match db::get_setting(&conn, SETTINGS_CATEGORY, key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "sqlite: failed to read credential");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        db::set_setting(&conn, SETTINGS_CATEGORY, key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        db::delete_setting(&conn, SETTINGS_CATEGORY, key)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}
