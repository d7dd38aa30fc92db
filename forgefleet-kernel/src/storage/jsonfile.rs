/**
 * STORAGE JSONFILE - Moteur embarqué en fichier JSON
 *
 * Un seul document par fichier : map clé -> valeur JSON, cache mémoire
 * sous parking_lot::Mutex, réécriture complète à chaque mutation.
 * Suffisant pour des volumes de sessions joueur ; un moteur relationnel
 * se brancherait derrière le même trait.
 */

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{StorageBackend, StorageError};

pub struct JsonFileStore {
    storage_path: PathBuf,
    cache: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl JsonFileStore {
    /// Ouvre (ou crée) le fichier de stockage et charge le cache
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let store = Self {
            storage_path: path.to_path_buf(),
            cache: Mutex::new(BTreeMap::new()),
        };
        store.load_from_disk()?;
        Ok(store)
    }

    fn load_from_disk(&self) -> Result<(), StorageError> {
        if !self.storage_path.exists() {
            if let Some(parent) = self.storage_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&self.storage_path, "{}")?;
        }
        let content = fs::read_to_string(&self.storage_path)?;
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(&content)?;
        *self.cache.lock() = map;
        Ok(())
    }

    fn save_to_disk(&self) -> Result<(), StorageError> {
        let json = {
            let cache = self.cache.lock();
            serde_json::to_string_pretty(&*cache)?
        };
        fs::write(&self.storage_path, json)?;
        Ok(())
    }
}

impl StorageBackend for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        Ok(self.cache.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        self.cache.lock().insert(key.to_string(), value);
        self.save_to_disk()
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.cache.lock().remove(key).is_none() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        self.save_to_disk()
    }

    fn list_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.cache.lock().keys().cloned().collect())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.save_to_disk()
    }
}
