/*!
Stub de transport heartbeat pour développement sans canal réel

Implémente la capacité HeartbeatTransport du kernel : enregistre tout ce que
le moteur envoie, et permet de simuler connexions, réponses et déconnexions
côté flotte.
*/

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

use forgefleet_kernel::transport::{
    EventReceiver, EventSender, HeartbeatTransport, TransportError, TransportEvent,
};

#[derive(Debug, Clone)]
pub struct SentFrame {
    pub server_id: String,
    pub payload: String,
}

pub struct StubTransport {
    sent: Mutex<Vec<SentFrame>>,
    failing: Mutex<HashSet<String>>,
    events: EventSender,
}

impl StubTransport {
    pub fn new() -> (Arc<Self>, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stub = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            events: tx,
        });
        (stub, rx)
    }

    /// Les envois vers ce serveur échoueront désormais (canal coupé)
    pub fn fail_sends_to(&self, server_id: &str) {
        self.failing.lock().insert(server_id.to_string());
    }

    pub fn restore_sends_to(&self, server_id: &str) {
        self.failing.lock().remove(server_id);
    }

    /// Simule l'ouverture d'un canal côté serveur
    pub fn simulate_connect(&self, server_id: &str) {
        let _ = self
            .events
            .send(TransportEvent::Connected { server_id: server_id.to_string() });
        log::info!("[stub] {server_id} connected");
    }

    /// Simule une trame entrante (JSON brut, parsé par le moteur)
    pub fn simulate_frame(&self, server_id: &str, payload: &str) {
        let _ = self.events.send(TransportEvent::Message {
            server_id: server_id.to_string(),
            payload: payload.to_string(),
        });
        log::info!("[stub] frame from {server_id}");
    }

    /// Simule la perte du canal de ce serveur
    pub fn simulate_disconnect(&self, server_id: &str) {
        let _ = self
            .events
            .send(TransportEvent::Disconnected { server_id: server_id.to_string() });
        log::info!("[stub] {server_id} disconnected");
    }

    /// Toutes les trames envoyées par le moteur (pour assertions)
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    pub fn frames_to(&self, server_id: &str) -> Vec<SentFrame> {
        self.sent
            .lock()
            .iter()
            .filter(|f| f.server_id == server_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl HeartbeatTransport for StubTransport {
    fn send(&self, server_id: &str, payload: &str) -> Result<(), TransportError> {
        if self.failing.lock().contains(server_id) {
            return Err(TransportError::NotConnected(server_id.to_string()));
        }
        self.sent.lock().push(SentFrame {
            server_id: server_id.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn label(&self) -> &'static str {
        "stub"
    }
}
