//! Opaque key-value persistence.
//!
//! The engine stores settings, counters, history and learner maps as JSON
//! values under fixed keys. Failures surface as `StorageFailure`; callers
//! log them and keep running on in-memory state.

use crate::error::GuardError;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const SETTINGS_KEY: &str = "settings";
pub const STATS_KEY: &str = "stats";
pub const HISTORY_KEY: &str = "history";
pub const LEARNER_KEY: &str = "learner";

pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>, GuardError>;
    fn save(&self, key: &str, value: &Value) -> Result<(), GuardError>;
}

fn storage_error(key: &str, e: impl std::fmt::Display) -> GuardError {
    GuardError::StorageFailure {
        key: key.to_string(),
        message: e.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>, GuardError> {
        let values = self.values.lock().map_err(|e| storage_error(key, e))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), GuardError> {
        let mut values = self.values.lock().map_err(|e| storage_error(key, e))?;
        values.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory.
///
/// Each save goes to its own temporary file and is renamed into place, so
/// readers see either the old or the new value, never a mix.
#[derive(Debug)]
pub struct JsonFileStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(directory: impl AsRef<Path>) -> Result<Self, GuardError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory).map_err(|e| {
            storage_error(
                "*",
                format!("failed to create {}: {e}", directory.display()),
            )
        })?;
        Ok(Self {
            directory,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<Value>, GuardError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| storage_error(key, e))?;
        let value = serde_json::from_str(&content).map_err(|e| storage_error(key, e))?;
        Ok(Some(value))
    }

    fn save(&self, key: &str, value: &Value) -> Result<(), GuardError> {
        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(value).map_err(|e| storage_error(key, e))?;

        let _writer = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{key}."))
            .suffix(".tmp")
            .tempfile_in(&self.directory)
            .map_err(|e| storage_error(key, e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| storage_error(key, e))?;
        tmp.as_file().sync_all().map_err(|e| storage_error(key, e))?;
        tmp.persist(&path).map_err(|e| storage_error(key, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.load(STATS_KEY).unwrap(), None);

        store.save(STATS_KEY, &json!({"total_analyzed": 3})).unwrap();
        assert_eq!(
            store.load(STATS_KEY).unwrap(),
            Some(json!({"total_analyzed": 3}))
        );
    }

    #[test]
    fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state")).unwrap();

        assert_eq!(store.load(SETTINGS_KEY).unwrap(), None);
        store
            .save(SETTINGS_KEY, &json!({"keep_history": false}))
            .unwrap();

        let reopened = JsonFileStore::new(dir.path().join("state")).unwrap();
        assert_eq!(
            reopened.load(SETTINGS_KEY).unwrap(),
            Some(json!({"keep_history": false}))
        );
        assert!(dir.path().join("state/settings.json").exists());
    }

    #[test]
    fn test_concurrent_saves_leave_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonFileStore::new(dir.path()).unwrap());

        let writers: Vec<_> = (0..8)
            .map(|writer| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let history: Vec<_> = (0..i).map(|n| format!("w{writer}-{n}")).collect();
                        store.save(HISTORY_KEY, &json!(history)).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let stored = store.load(HISTORY_KEY).unwrap().unwrap();
        assert_eq!(stored.as_array().map(|a| a.len()), Some(49));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name != "history.json")
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn test_unreadable_file_is_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("learner.json"), "{ not json").unwrap();

        assert!(matches!(
            store.load(LEARNER_KEY),
            Err(GuardError::StorageFailure { .. })
        ));
    }
}
