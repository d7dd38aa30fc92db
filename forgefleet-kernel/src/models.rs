/**
 * MODELS - Types partagés du kernel ForgeFleet
 *
 * RÔLE :
 * Ce module définit l'entrée de registre d'un serveur de jeu (identité fixe +
 * état runtime mutable), la machine à états du cycle de vie, et les messages
 * heartbeat échangés sur le fil.
 *
 * FONCTIONNEMENT :
 * - ServerEntry = identité immuable + RuntimeState derrière un Mutex par entrée
 * - LifecycleState = offline/starting/online/stopping/crashed
 * - HeartbeatMessage = enum taguée par "type" (request kernel→serveur,
 *   response serveur→kernel), tous les champs au-delà de is_running optionnels
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use time::OffsetDateTime;

use crate::config::{JavaMemory, ServerConf};

/// Nombre max de lignes de sortie process conservées par entrée
pub const OUTPUT_CAP: usize = 100;

/// Cycle de vie d'un serveur géré.
/// Les transitions sont appliquées par le Heartbeat Engine et le superviseur,
/// jamais directement par les surfaces API/console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Offline,
    Starting,
    Online,
    Stopping,
    Crashed,
}

impl LifecycleState {
    /// True pour les états où le processus est censé tourner (start_time non nul)
    pub fn is_running(self) -> bool {
        matches!(self, LifecycleState::Starting | LifecycleState::Online)
    }

    /// Résout un nom d'état explicite venu d'un heartbeat.
    /// Un nom inconnu retourne None et le moteur retombe sur is_running.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "offline" => Some(LifecycleState::Offline),
            "starting" => Some(LifecycleState::Starting),
            "online" => Some(LifecycleState::Online),
            "stopping" => Some(LifecycleState::Stopping),
            "crashed" => Some(LifecycleState::Crashed),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Offline => "offline",
            LifecycleState::Starting => "starting",
            LifecycleState::Online => "online",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Dernières métriques rapportées, remplacées d'un bloc.
/// Jamais de mise à jour champ par champ : un heartbeat partiel est ignoré.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tps: f64,
    pub cpu_usage: f64,
    pub ram_usage_mb: f64,
}

impl MetricsSnapshot {
    /// Arrondi à 2 décimales comme les valeurs affichées en console
    pub fn rounded(tps: f64, cpu_usage: f64, ram_usage_mb: f64) -> Self {
        Self {
            tps: round2(tps),
            cpu_usage: round2(cpu_usage),
            ram_usage_mb: round2(ram_usage_mb),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// État runtime d'un serveur, possédé par le Registry.
/// Écrit uniquement par le Heartbeat Engine et le superviseur.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub lifecycle: LifecycleState,
    /// Canal transport vivant pour ce serveur (toujours true côté bus une fois abonné)
    pub connected: bool,
    /// Invariant : Some ssi lifecycle ∈ {Starting, Online}
    pub start_time: Option<OffsetDateTime>,
    pub metrics: Option<MetricsSnapshot>,
    pub players_online: BTreeSet<String>,
    pub max_players: u32,
    pub plugins: Vec<String>,
    /// Dernières lignes de sortie du processus, bornées à OUTPUT_CAP
    pub last_output: VecDeque<String>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleState::Offline,
            connected: false,
            start_time: None,
            metrics: None,
            players_online: BTreeSet::new(),
            max_players: 0,
            plugins: Vec::new(),
            last_output: VecDeque::new(),
        }
    }
}

impl RuntimeState {
    pub fn push_output(&mut self, line: String) {
        if self.last_output.len() == OUTPUT_CAP {
            self.last_output.pop_front();
        }
        self.last_output.push_back(line);
    }

    /// Uptime en secondes, uniquement pendant Starting/Online
    pub fn uptime_seconds(&self, now: OffsetDateTime) -> Option<u64> {
        if !self.lifecycle.is_running() {
            return None;
        }
        self.start_time
            .map(|start| (now - start).whole_seconds().max(0) as u64)
    }
}

/// Entrée du Registry pour un serveur géré.
/// L'identité est figée à l'enregistrement ; seul `runtime` bouge ensuite,
/// sous son propre verrou (granularité par entrée, cf. Registry).
#[derive(Debug)]
pub struct ServerEntry {
    pub server_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub server_type: String,
    pub software: String,
    pub version: String,
    pub config_path: PathBuf,
    pub java_memory: JavaMemory,
    pub runtime: Mutex<RuntimeState>,
}

impl ServerEntry {
    /// Construit une entrée depuis un fichier de config serveur scanné.
    /// L'id est le nom du fichier sans extension.
    pub fn from_conf(server_id: &str, conf: ServerConf, config_path: PathBuf) -> Self {
        Self {
            server_id: server_id.to_string(),
            name: conf.server_name.unwrap_or_else(|| server_id.to_string()),
            host: conf.ip,
            port: conf.port,
            server_type: conf.server_type,
            software: conf.software,
            version: conf.version,
            config_path,
            java_memory: conf.java_memory,
            runtime: Mutex::new(RuntimeState::default()),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Requête heartbeat (kernel → serveur) et réponse (serveur → kernel).
/// Tout JSON qui ne se désérialise pas vers une de ces variantes est
/// loggé puis ignoré par le moteur.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HeartbeatMessage {
    HeartbeatRequest { timestamp: String },
    HeartbeatResponse(HeartbeatReport),
}

/// Contenu d'une réponse heartbeat.
/// Seul is_running est obligatoire ; champ absent == null == "rien de neuf".
/// Exception voulue : players_online/max_players prennent leur défaut
/// (vide/zéro) quand ils manquent et sont appliqués à chaque réponse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub server_id: String,
    pub is_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_usage_mb: Option<f64>,
    #[serde(default)]
    pub players_online: Vec<String>,
    #[serde(default)]
    pub max_players: u32,
}
