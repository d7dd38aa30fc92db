/**
 * TRANSPORT DIRECT - Un canal websocket par serveur
 *
 * RÔLE :
 * Registre des connexions vivantes server_id -> sender sortant. Le endpoint
 * websocket de http.rs authentifie la connexion puis l'enregistre ici ;
 * ce module ne voit jamais de token.
 *
 * FONCTIONNEMENT :
 * - register remplace une éventuelle connexion précédente du même serveur
 * - chaque connexion porte un id de génération : la fermeture d'une vieille
 *   connexion ne désenregistre pas celle qui l'a remplacée
 * - send vers un serveur sans canal => TransportError::NotConnected
 */

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{EventReceiver, EventSender, HeartbeatTransport, TransportError, TransportEvent};

struct Channel {
    conn_id: u64,
    sender: mpsc::UnboundedSender<String>,
}

pub struct DirectTransport {
    channels: Mutex<HashMap<String, Channel>>,
    events: EventSender,
    next_conn_id: AtomicU64,
}

impl DirectTransport {
    pub fn new() -> (Arc<Self>, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            events: tx,
            next_conn_id: AtomicU64::new(1),
        });
        (transport, rx)
    }

    /// Enregistre une connexion authentifiée et retourne (id de génération,
    /// réception des trames sortantes à pomper vers le socket).
    pub fn register(&self, server_id: &str) -> (u64, mpsc::UnboundedReceiver<String>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .channels
            .lock()
            .insert(server_id.to_string(), Channel { conn_id, sender: tx });
        if previous.is_some() {
            eprintln!("[transport] {server_id} reconnected, previous channel replaced");
        }
        let _ = self.events.send(TransportEvent::Connected { server_id: server_id.to_string() });
        println!("[transport] server connected: {server_id}");
        (conn_id, rx)
    }

    /// Désenregistre la connexion si elle est encore la connexion courante,
    /// et publie l'événement de déconnexion.
    pub fn unregister(&self, server_id: &str, conn_id: u64) {
        let removed = {
            let mut channels = self.channels.lock();
            match channels.get(server_id) {
                Some(ch) if ch.conn_id == conn_id => {
                    channels.remove(server_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            let _ = self
                .events
                .send(TransportEvent::Disconnected { server_id: server_id.to_string() });
            eprintln!("[transport] server disconnected: {server_id}");
        }
    }

    /// Livre une trame entrante au moteur
    pub fn deliver(&self, server_id: &str, payload: String) {
        let _ = self.events.send(TransportEvent::Message {
            server_id: server_id.to_string(),
            payload,
        });
    }

    pub fn is_connected(&self, server_id: &str) -> bool {
        self.channels.lock().contains_key(server_id)
    }
}

impl HeartbeatTransport for DirectTransport {
    fn send(&self, server_id: &str, payload: &str) -> Result<(), TransportError> {
        let channels = self.channels.lock();
        let channel = channels
            .get(server_id)
            .ok_or_else(|| TransportError::NotConnected(server_id.to_string()))?;
        channel
            .sender
            .send(payload.to_string())
            .map_err(|_| TransportError::NotConnected(server_id.to_string()))
    }

    fn label(&self) -> &'static str {
        "direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_channel_fails() {
        let (transport, _rx) = DirectTransport::new();
        let err = transport.send("s1", "{}").unwrap_err();
        assert!(matches!(err, TransportError::NotConnected(id) if id == "s1"));
    }

    #[tokio::test]
    async fn register_send_unregister_roundtrip() {
        let (transport, mut events) = DirectTransport::new();
        let (conn_id, mut outbound) = transport.register("s1");

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Connected { server_id: "s1".into() })
        );

        transport.send("s1", "ping").unwrap();
        assert_eq!(outbound.recv().await.as_deref(), Some("ping"));

        transport.deliver("s1", "pong".into());
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message { server_id: "s1".into(), payload: "pong".into() })
        );

        transport.unregister("s1", conn_id);
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Disconnected { server_id: "s1".into() })
        );
        assert!(!transport.is_connected("s1"));
    }

    #[tokio::test]
    async fn stale_unregister_does_not_drop_replacement() {
        let (transport, mut events) = DirectTransport::new();
        let (old_conn, _old_rx) = transport.register("s1");
        let (_new_conn, mut new_rx) = transport.register("s1");

        // la fermeture tardive de la vieille connexion est un no-op
        transport.unregister("s1", old_conn);
        assert!(transport.is_connected("s1"));
        transport.send("s1", "still here").unwrap();
        assert_eq!(new_rx.recv().await.as_deref(), Some("still here"));

        // deux Connected, aucun Disconnected
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Connected { server_id: "s1".into() })
        );
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Connected { server_id: "s1".into() })
        );
        assert!(events.try_recv().is_err());
    }
}
