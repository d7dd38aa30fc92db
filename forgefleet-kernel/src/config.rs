/**
 * CONFIG - Configuration du kernel ForgeFleet
 *
 * RÔLE :
 * Charge forgefleet.yaml une seule fois au démarrage et construit une valeur
 * Settings immuable, injectée par référence dans chaque composant.
 * Aucun état global : les composants ne relisent jamais la config ambiante.
 *
 * FONCTIONNEMENT :
 * - chemin surchargeable via FORGEFLEET_CONFIG
 * - fichier absent ou invalide => valeurs par défaut + warning
 * - ServerConf = schéma d'un fichier de config serveur (un YAML par serveur,
 *   scanné par le Registry au démarrage)
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub cloud: CloudConf,
    #[serde(default)]
    pub network: NetworkConf,
    #[serde(default)]
    pub heartbeat: HeartbeatConf,
    #[serde(default)]
    pub mqtt: MqttConf,
    #[serde(default)]
    pub paths: PathsConf,
    #[serde(default)]
    pub storage: StorageConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CloudConf {
    pub debug_mode: bool,
    pub autoregister: bool,
}

impl Default for CloudConf {
    fn default() -> Self {
        Self { debug_mode: false, autoregister: true }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConf {
    pub host: String,
    pub port: u16,
    /// Matériel TLS fourni de l'extérieur ; consommé tel quel, jamais généré ici
    pub use_https: bool,
    pub cert_file_path: PathBuf,
    pub key_file_path: PathBuf,
    pub auth_config_path: PathBuf,
}

impl Default for NetworkConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 9989,
            use_https: false,
            cert_file_path: PathBuf::from("./config/cert.pem"),
            key_file_path: PathBuf::from("./config/key.pem"),
            auth_config_path: PathBuf::from("./config/auth_tokens.yaml"),
        }
    }
}

/// Variante de transport heartbeat active pour ce déploiement.
/// Une seule à la fois ; le moteur ne voit que le trait partagé.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Un websocket authentifié par serveur
    Direct,
    /// Bus MQTT partagé, démultiplexé par server_id
    Bus,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HeartbeatConf {
    pub interval_seconds: u64,
    pub transport: TransportKind,
}

impl Default for HeartbeatConf {
    fn default() -> Self {
        Self { interval_seconds: 10, transport: TransportKind::Direct }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 1883 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PathsConf {
    /// Dossier des configs serveur (un YAML par serveur)
    pub server_config_dir: PathBuf,
    /// Racine des installations serveur (screen/run.sh par serveur)
    pub server_base_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for PathsConf {
    fn default() -> Self {
        Self {
            server_config_dir: PathBuf::from("./data/server_configs"),
            server_base_path: PathBuf::from("./running/static"),
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Fichier JSON embarqué (défaut)
    Jsonfile,
    /// Purement en mémoire, rien ne survit au redémarrage
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConf {
    pub backend: StorageKind,
    pub path: PathBuf,
}

impl Default for StorageConf {
    fn default() -> Self {
        Self { backend: StorageKind::Jsonfile, path: PathBuf::from("./data/storage.json") }
    }
}

/// Options mémoire JVM passées au script de lancement
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JavaMemory {
    #[serde(rename = "Xmx")]
    pub xmx: String,
    #[serde(rename = "Xms")]
    pub xms: String,
}

impl Default for JavaMemory {
    fn default() -> Self {
        Self { xmx: "1024M".into(), xms: "1024M".into() }
    }
}

/// Schéma d'un fichier de config serveur scanné depuis server_config_dir.
/// L'id du serveur est le nom du fichier (sans extension), pas un champ.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConf {
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_game_port")]
    pub port: u16,
    #[serde(default = "default_server_type")]
    pub server_type: String,
    #[serde(default)]
    pub software: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub java_memory: JavaMemory,
}

fn default_ip() -> String {
    "127.0.0.1".into()
}

fn default_game_port() -> u16 {
    25565
}

fn default_server_type() -> String {
    "Unknown".into()
}

/// Charge les settings kernel depuis forgefleet.yaml (ou FORGEFLEET_CONFIG)
pub async fn load_settings() -> Settings {
    let path = std::env::var("FORGEFLEET_CONFIG").unwrap_or_else(|_| "forgefleet.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return Settings::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            eprintln!("[kernel] config invalide ({path}): {e}");
            Settings::default()
        })
    } else {
        eprintln!("[kernel] pas de {path}, usage config par défaut");
        Settings::default()
    }
}
