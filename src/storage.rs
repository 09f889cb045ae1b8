//! Persistence boundary for settings and statistics.
//!
//! The process keeps its durable state in an opaque string-keyed blob store.
//! [`StateStore`] layers JSON (de)serialization on top of any
//! [`KeyValueStore`]; [`FileStore`] is the on-disk implementation used by the
//! CLI and [`MemoryStore`] serves embedders and tests.
//!
//! ## File Format
//!
//! ```text
//! state.json:
//! {
//!   "settings":      "{\"basic\":null,\"client\":{...}}",
//!   "lastResetDate": "\"2024-01-02\"",
//!   "seenToday":     "[\"34520d\",\"4ca7b3\"]",
//!   "dailyCount":    "2",
//!   "history":       "[{...}]"
//! }
//! ```
//!
//! Every value is itself a JSON document. Writes go to a temporary file that
//! is renamed over the original, so a crash never leaves a torn file behind.

use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid file format: {0}")]
    InvalidFormat(#[from] serde_json::Error),
}

pub const KEY_SETTINGS: &str = "settings";
pub const KEY_LAST_RESET_DATE: &str = "lastResetDate";
pub const KEY_SEEN_TODAY: &str = "seenToday";
pub const KEY_DAILY_COUNT: &str = "dailyCount";
pub const KEY_HISTORY: &str = "history";

/// A string-keyed blob store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
}

/// Volatile store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single JSON file.
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let values = match fs::read(&path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut values = self.values.lock();
        let mut updated = values.clone();
        updated.insert(key.to_string(), value);
        // Memory only follows a successful write
        self.write_all(&updated)?;
        *values = updated;
        Ok(())
    }
}

/// Typed JSON access to a [`KeyValueStore`].
#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn KeyValueStore>,
}

impl StateStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read `key`, treating a missing or undecodable value as absent.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding unreadable value for {}: {}", key, e);
                None
            }
        }
    }

    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.store.set(key, serde_json::to_string(value)?)
    }
}
