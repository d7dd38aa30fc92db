/**
 * REGISTRY - Registre des serveurs gérés
 *
 * RÔLE :
 * Détient l'ensemble des serveurs connus : identité statique + état runtime.
 * Unique ressource partagée entre la boucle heartbeat, le handler d'événements
 * transport et les surfaces API/console.
 *
 * FONCTIONNEMENT :
 * - Vec + index HashMap : lookup O(1), énumération en ordre d'insertion stable
 * - un Mutex par entrée : muter lobby-1 ne sérialise jamais contre lobby-2
 * - mutations sur id inconnu : log puis no-op, un agent à la traîne ne doit
 *   pas pouvoir faire tomber le moteur
 * - peuplé au démarrage par scan du dossier de configs (un YAML par serveur) ;
 *   une entrée enregistrée n'est jamais retirée
 */

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

use crate::config::ServerConf;
use crate::models::{LifecycleState, MetricsSnapshot, ServerEntry};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate server id: {0}")]
    DuplicateId(String),
    #[error("config scan failed: {0}")]
    Scan(#[from] std::io::Error),
}

#[derive(Default)]
struct RegistryInner {
    entries: Vec<Arc<ServerEntry>>,
    index: HashMap<String, usize>,
}

pub struct ServerRegistry {
    inner: RwLock<RegistryInner>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self { inner: RwLock::new(RegistryInner::default()) }
    }

    /// Enregistre une nouvelle entrée. Échoue si l'id existe déjà ;
    /// les champs de la seconde déclaration ne sont jamais appliqués.
    pub fn register(&self, entry: ServerEntry) -> Result<Arc<ServerEntry>, RegistryError> {
        let mut inner = self.inner.write();
        if inner.index.contains_key(&entry.server_id) {
            return Err(RegistryError::DuplicateId(entry.server_id));
        }
        let entry = Arc::new(entry);
        let slot = inner.entries.len();
        inner.index.insert(entry.server_id.clone(), slot);
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn get(&self, server_id: &str) -> Option<Arc<ServerEntry>> {
        let inner = self.inner.read();
        inner.index.get(server_id).map(|&i| inner.entries[i].clone())
    }

    /// Toutes les entrées, dans l'ordre d'enregistrement
    pub fn list(&self) -> Vec<Arc<ServerEntry>> {
        self.inner.read().entries.clone()
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.inner.read().entries.iter().map(|e| e.server_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remplace le snapshot métriques d'une entrée, d'un bloc
    pub fn update_metrics(&self, server_id: &str, tps: f64, cpu_usage: f64, ram_usage_mb: f64) {
        match self.get(server_id) {
            Some(entry) => {
                entry.runtime.lock().metrics =
                    Some(MetricsSnapshot::rounded(tps, cpu_usage, ram_usage_mb));
            }
            None => eprintln!("[registry] metrics for unknown server {server_id}, dropped"),
        }
    }

    pub fn update_players(&self, server_id: &str, players: Vec<String>, max_players: u32) {
        match self.get(server_id) {
            Some(entry) => {
                let mut rt = entry.runtime.lock();
                rt.players_online = players.into_iter().collect();
                rt.max_players = max_players;
            }
            None => eprintln!("[registry] players for unknown server {server_id}, dropped"),
        }
    }

    pub fn set_lifecycle(&self, server_id: &str, state: LifecycleState) {
        match self.get(server_id) {
            Some(entry) => entry.runtime.lock().lifecycle = state,
            None => eprintln!("[registry] lifecycle for unknown server {server_id}, dropped"),
        }
    }

    /// Scanne le dossier de configs serveur et enregistre chaque fichier YAML.
    /// Id en doublon : signalé, fichier sauté, le scan continue.
    /// Dossier absent : warning et flotte vide (pas une erreur).
    /// Dossier illisible : erreur fatale remontée à l'appelant.
    pub async fn scan_config_dir(&self, dir: &Path) -> Result<usize, RegistryError> {
        if !dir.exists() {
            eprintln!("[registry] config dir {dir:?} does not exist, empty fleet");
            return Ok(0);
        }

        let mut registered = 0usize;
        let mut entries = fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let ext = path.extension().and_then(|s| s.to_str());
            if matches!(ext, Some("yml") | Some("yaml")) {
                paths.push(path);
            }
        }
        // ordre déterministe quel que soit le filesystem
        paths.sort();

        for path in paths {
            let Some(server_id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };
            let content = match fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("[registry] failed to read {path:?}: {e}");
                    continue;
                }
            };
            let conf: ServerConf = match serde_yaml::from_str(&content) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("[registry] invalid server config {path:?}: {e}");
                    continue;
                }
            };
            match self.register(ServerEntry::from_conf(&server_id, conf, path)) {
                Ok(entry) => {
                    registered += 1;
                    println!("[registry] registered server '{}' ({})", entry.name, server_id);
                }
                Err(RegistryError::DuplicateId(id)) => {
                    eprintln!("[registry] duplicate server id '{id}', entry skipped");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(registered)
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConf;
    use std::path::PathBuf;

    fn entry(id: &str) -> ServerEntry {
        let conf: ServerConf = serde_yaml::from_str("{}").unwrap();
        ServerEntry::from_conf(id, conf, PathBuf::from(format!("{id}.yml")))
    }

    #[test]
    fn register_then_lookup() {
        let reg = ServerRegistry::new();
        reg.register(entry("lobby-1")).unwrap();
        assert!(reg.get("lobby-1").is_some());
        assert!(reg.get("lobby-2").is_none());
    }

    #[test]
    fn duplicate_id_rejected_first_entry_kept() {
        let reg = ServerRegistry::new();
        let conf: ServerConf = serde_yaml::from_str("server_name: First\n").unwrap();
        reg.register(ServerEntry::from_conf("s1", conf, PathBuf::from("a.yml"))).unwrap();

        let conf2: ServerConf = serde_yaml::from_str("server_name: Second\n").unwrap();
        let err = reg
            .register(ServerEntry::from_conf("s1", conf2, PathBuf::from("b.yml")))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(id) if id == "s1"));

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("s1").unwrap().name, "First");
    }

    #[test]
    fn list_keeps_insertion_order() {
        let reg = ServerRegistry::new();
        for id in ["c", "a", "b"] {
            reg.register(entry(id)).unwrap();
        }
        let ids: Vec<String> = reg.list().iter().map(|e| e.server_id.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn mutations_on_unknown_id_are_noops() {
        let reg = ServerRegistry::new();
        reg.update_metrics("ghost", 20.0, 1.0, 100.0);
        reg.update_players("ghost", vec!["alice".into()], 10);
        reg.set_lifecycle("ghost", LifecycleState::Online);
        assert!(reg.is_empty());
    }

    #[test]
    fn update_players_replaces_set() {
        let reg = ServerRegistry::new();
        reg.register(entry("s1")).unwrap();
        reg.update_players("s1", vec!["alice".into(), "bob".into(), "alice".into()], 20);
        let e = reg.get("s1").unwrap();
        {
            let rt = e.runtime.lock();
            assert_eq!(rt.players_online.len(), 2);
            assert_eq!(rt.max_players, 20);
        }
        reg.update_players("s1", vec![], 20);
        assert!(e.runtime.lock().players_online.is_empty());
    }

    #[tokio::test]
    async fn scan_registers_yaml_files_and_skips_broken_ones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lobby-1.yml"), "server_name: Lobby-1\nport: 25566\n")
            .unwrap();
        std::fs::write(dir.path().join("game-1.yaml"), "server_type: SkyWars\n").unwrap();
        std::fs::write(dir.path().join("broken.yml"), "server_name: [unclosed\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let reg = ServerRegistry::new();
        let n = reg.scan_config_dir(dir.path()).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(reg.get("lobby-1").unwrap().port, 25566);
        assert_eq!(reg.get("game-1").unwrap().server_type, "SkyWars");
        assert!(reg.get("broken").is_none());
    }

    #[tokio::test]
    async fn scan_missing_dir_yields_empty_fleet() {
        let reg = ServerRegistry::new();
        let n = reg.scan_config_dir(Path::new("/nonexistent/forgefleet-test")).await.unwrap();
        assert_eq!(n, 0);
    }
}
