use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ClientError;

/// Keys the client reads from the persistent store.
pub mod keys {
    pub const API_BASE: &str = "API_BASE";
    pub const APP_ENV: &str = "APP_ENV";
    pub const CLOUD_ENV_ID: &str = "CLOUD_ENV_ID";
    pub const CLOUD_SERVICE_NAME: &str = "CLOUD_SERVICE_NAME";
    pub const TOKEN: &str = "token";

    /// Every key the client understands, in display order.
    pub const ALL: [&str; 5] = [API_BASE, APP_ENV, CLOUD_ENV_ID, CLOUD_SERVICE_NAME, TOKEN];
}

/// Default location of the on-disk store, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = ".labclient/store.toml";

/// Opaque persistent key-value storage.
///
/// Reads never fail: a missing or unreadable entry is simply absent.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;

    fn remove(&self, key: &str) -> Result<(), ClientError>;

    /// Returns the value only when it is present and non-empty.
    fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Mutex::new(map),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still a valid map.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a flat TOML table of strings.
///
/// The file is re-read on every access and rewritten atomically on every
/// mutation, so several processes may share it.
#[derive(Debug)]
pub struct TomlFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<BTreeMap<String, String>, ClientError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(ClientError::Io(e)),
        };
        let table: toml::Table = toml::from_str(&text)
            .map_err(|e| ClientError::Store(format!("{}: {e}", self.path.display())))?;

        // Non-string values are ignored rather than rejected.
        Ok(table
            .into_iter()
            .filter_map(|(k, v)| match v {
                toml::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect())
    }

    fn write_table(&self, table: &BTreeMap<String, String>) -> Result<(), ClientError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let text = toml::to_string(table).map_err(|e| ClientError::Store(e.to_string()))?;

        // Atomic write: temp file + rename prevents partial reads
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, text.as_bytes())?;
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), ClientError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut table = self.read_table()?;
        f(&mut table);
        self.write_table(&table)
    }
}

impl KvStore for TomlFileStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.read_table() {
            Ok(mut table) => table.remove(key),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "failed to read store: {e}");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.update(|table| {
            table.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        self.update(|table| {
            table.remove(key);
        })
    }
}
