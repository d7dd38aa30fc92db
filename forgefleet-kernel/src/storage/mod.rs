/**
 * STORAGE - Interface de persistance unifiée
 *
 * RÔLE :
 * Capacité get/put/delete/list_keys/close derrière laquelle vivent les
 * moteurs de stockage concrets. Le cœur (sessions joueur notamment) ne
 * dépend que du trait, jamais d'un backend.
 *
 * FONCTIONNEMENT :
 * - une implémentation par moteur : jsonfile (embarqué), memory (clé-valeur)
 * - valeurs = documents JSON opaques (serde_json::Value)
 * - open_backend sélectionne le moteur depuis la config au démarrage
 */

pub mod jsonfile;
pub mod memory;

use std::sync::Arc;

use crate::config::{StorageConf, StorageKind};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interface commune à tous les moteurs de stockage
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;
    /// Écrit ou remplace le document sous `key`
    fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
    fn list_keys(&self) -> Result<Vec<String>, StorageError>;
    /// Libère les ressources du moteur ; défaut no-op
    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Ouvre le moteur de stockage sélectionné par la configuration
pub fn open_backend(conf: &StorageConf) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match conf.backend {
        StorageKind::Jsonfile => {
            let store = jsonfile::JsonFileStore::open(&conf.path)?;
            println!("[storage] jsonfile backend at {:?}", conf.path);
            Ok(Arc::new(store))
        }
        StorageKind::Memory => {
            println!("[storage] memory backend (nothing will be persisted)");
            Ok(Arc::new(memory::MemoryStore::new()))
        }
    }
}
