//! Persisted client session (`adminData` + `token`).
//!
//! The session lives in a small key/value store. The default backend is a
//! JSON file in the data directory; the OS credential store (via the
//! `keyring` crate: DPAPI on Windows, Keychain on macOS, Secret Service on
//! Linux) can be selected instead. Neither is a security boundary: anything
//! with access to the user's account can read the token.

use keyring::Entry;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{AppConfig, SessionBackendKind};

const SERVICE_NAME: &str = "restaurant-dashboard";

// Storage keys
pub const KEY_ADMIN_DATA: &str = "adminData";
pub const KEY_TOKEN: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Session file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("Credential store error: {0}")]
    Keyring(String),
}

impl From<keyring::Error> for StorageError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// String key/value store. Deleting a missing key succeeds.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// OS credential store, one entry per key.
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl StorageBackend for KeyringBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let entry = Entry::new(&self.service, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let entry = Entry::new(&self.service, key)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A single JSON object on disk holding every key.
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Result<Map<String, Value>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageError::Corrupt {
                path: self.path.clone(),
                message: "expected a JSON object".to_string(),
            }),
            Err(e) => Err(StorageError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            }),
        }
    }

    /// Write to a sibling temp file and rename over the original.
    fn save(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }
        let text = serde_json::to_string_pretty(map).map_err(|e| StorageError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let map = self.load()?;
        Ok(map.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        // A corrupt file is replaced rather than blocking every future write.
        let mut map = self.load().unwrap_or_else(|e| {
            warn!(error = %e, "discarding unreadable session file");
            Map::new()
        });
        map.insert(key.to_string(), Value::String(value.to_string()));
        self.save(&map)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = match self.load() {
            Ok(map) => map,
            Err(StorageError::Corrupt { .. }) => Map::new(),
            Err(e) => return Err(e),
        };
        if map.remove(key).is_none() && self.path.exists() {
            return Ok(());
        }
        if map.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_error(e)),
            };
        }
        self.save(&map)
    }
}

/// Process-local store, used in tests.
#[derive(Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, String>>,
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub id: String,
    pub username: String,
}

impl AdminIdentity {
    /// Accepts `{id, username}` with a string or numeric id.
    pub fn from_value(v: &Value) -> Option<Self> {
        let id = match v.get("id")? {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let username = v
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self { id, username })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "id": self.id, "username": self.username })
    }
}

#[derive(Clone)]
pub struct Session {
    pub admin: AdminIdentity,
    pub token: Option<Zeroizing<String>>,
}

impl Session {
    pub fn new(admin: AdminIdentity, token: Option<&str>) -> Self {
        Self {
            admin,
            token: token
                .filter(|t| !t.trim().is_empty())
                .map(|t| Zeroizing::new(t.to_string())),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().map(String::as_str)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("admin", &self.admin)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Owned handle on the persisted session.
pub struct SessionStore {
    backend: Box<dyn StorageBackend>,
}

impl SessionStore {
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match config.session_backend {
            SessionBackendKind::File => Self::new(Box::new(FileBackend::new(config.session_file()))),
            SessionBackendKind::Keyring => Self::new(Box::new(KeyringBackend::default())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::default()))
    }

    /// The persisted session, or `None`. Storage errors are logged and
    /// reported as "no session".
    pub fn get_session(&self) -> Option<Session> {
        let raw = match self.backend.get(KEY_ADMIN_DATA) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read stored session");
                return None;
            }
        };
        let admin = serde_json::from_str::<Value>(&raw)
            .ok()
            .as_ref()
            .and_then(AdminIdentity::from_value);
        let Some(admin) = admin else {
            warn!("stored adminData is malformed, ignoring");
            return None;
        };
        let token = match self.backend.get(KEY_TOKEN) {
            Ok(token) => token.map(Zeroizing::new),
            Err(e) => {
                warn!(error = %e, "failed to read stored token");
                None
            }
        };
        debug!(admin_id = %admin.id, "session loaded");
        Some(Session {
            admin,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn set_session(&self, session: &Session) -> Result<(), StorageError> {
        self.backend
            .set(KEY_ADMIN_DATA, &session.admin.to_value().to_string())?;
        match session.token() {
            Some(token) => self.backend.set(KEY_TOKEN, token)?,
            None => self.backend.delete(KEY_TOKEN)?,
        }
        info!(admin_id = %session.admin.id, "session stored");
        Ok(())
    }

    pub fn clear_session(&self) -> Result<(), StorageError> {
        self.backend.delete(KEY_ADMIN_DATA)?;
        self.backend.delete(KEY_TOKEN)?;
        info!("session cleared");
        Ok(())
    }
}
