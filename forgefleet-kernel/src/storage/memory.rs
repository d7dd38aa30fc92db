/// Moteur clé-valeur en mémoire : tests et mode éphémère
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{StorageBackend, StorageError};

#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        self.map.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.map.lock().remove(key).is_none() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.map.lock().keys().cloned().collect())
    }
}
