/**
 * TRANSPORT - Canaux heartbeat derrière une capacité unique
 *
 * RÔLE :
 * Le Heartbeat Engine parle à la flotte via ce trait, jamais via une variante
 * concrète. Deux variantes existent, une seule active par déploiement :
 * - direct : un websocket authentifié par serveur (transport/direct.rs)
 * - bus : topic MQTT partagé démultiplexé par server_id (transport/bus.rs)
 *
 * FONCTIONNEMENT :
 * - send(server_id, payload) synchrone, l'échec est localisé à ce serveur
 * - événements entrants livrés sur un canal mpsc remis à la construction :
 *   Connected / Message / Disconnected ; un disconnect est un événement
 *   distinct d'un message, le moteur distingue "pas encore de réponse"
 *   de "canal disparu"
 */

pub mod bus;
pub mod direct;

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Un canal vivant existe désormais pour ce serveur
    Connected { server_id: String },
    /// Trame brute reçue de ce serveur (JSON non encore parsé)
    Message { server_id: String, payload: String },
    /// Le canal de ce serveur a disparu
    Disconnected { server_id: String },
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no live channel for server: {0}")]
    NotConnected(String),
    #[error("bus publish failed: {0}")]
    Publish(String),
}

/// Capacité d'envoi vers un serveur de la flotte
pub trait HeartbeatTransport: Send + Sync {
    fn send(&self, server_id: &str, payload: &str) -> Result<(), TransportError>;
    /// Étiquette pour les logs ("direct" ou "bus")
    fn label(&self) -> &'static str;
}
