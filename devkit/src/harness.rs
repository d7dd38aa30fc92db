/*!
Harness de scénarios flotte pour ForgeFleet

Facilite l'écriture de tests bout-en-bout sur le Heartbeat Engine:
- Setup registry + moteur + stub de transport en une ligne
- Simulation d'agents serveur (connexion, réponses heartbeat, déconnexion)
- Les événements sont pompés de façon synchrone : les scénarios sont
  déterministes, aucune task en arrière-plan
*/

use std::sync::Arc;
use std::time::Duration;

use forgefleet_kernel::config::ServerConf;
use forgefleet_kernel::heartbeat::HeartbeatEngine;
use forgefleet_kernel::models::{LifecycleState, MetricsSnapshot, ServerEntry};
use forgefleet_kernel::registry::ServerRegistry;
use forgefleet_kernel::supervisor::{ProcessLauncher, ProcessSupervisor, SupervisorError};
use forgefleet_kernel::transport::EventReceiver;

use crate::transport_stub::StubTransport;

/// Launcher qui réussit toujours sans toucher au système.
/// Les scénarios confirment ensuite la réalité via heartbeat, comme en vrai.
pub struct NoopLauncher;

impl ProcessLauncher for NoopLauncher {
    fn spawn(&self, _entry: &ServerEntry) -> Result<(), SupervisorError> {
        Ok(())
    }

    fn stop(&self, _entry: &ServerEntry) -> Result<(), SupervisorError> {
        Ok(())
    }

    fn is_alive(&self, _entry: &ServerEntry) -> bool {
        false
    }
}

pub struct FleetHarness {
    pub registry: Arc<ServerRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub engine: HeartbeatEngine,
    pub stub: Arc<StubTransport>,
    events: EventReceiver,
}

impl FleetHarness {
    pub fn new() -> Self {
        env_logger::try_init().ok();
        let registry = Arc::new(ServerRegistry::new());
        let (stub, events) = StubTransport::new();
        let engine = HeartbeatEngine::new(
            registry.clone(),
            stub.clone(),
            Duration::from_secs(10),
        );
        let supervisor = Arc::new(ProcessSupervisor::new(Arc::new(NoopLauncher)));
        Self { registry, supervisor, engine, stub, events }
    }

    /// Enregistre un serveur minimal sous cet id
    pub fn register_server(&self, server_id: &str) -> Arc<ServerEntry> {
        let conf: ServerConf = default_server_conf();
        self.registry
            .register(ServerEntry::from_conf(
                server_id,
                conf,
                std::path::PathBuf::from(format!("{server_id}.yml")),
            ))
            .expect("duplicate server id in harness")
    }

    /// Applique tous les événements transport en attente au moteur
    pub fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.engine.handle_event(event);
        }
    }

    /// Un tour de heartbeat du moteur
    pub fn tick(&mut self) {
        self.engine.run_round();
        self.pump();
    }

    pub fn connect(&mut self, server_id: &str) {
        self.stub.simulate_connect(server_id);
        self.pump();
    }

    pub fn disconnect(&mut self, server_id: &str) {
        self.stub.simulate_disconnect(server_id);
        self.pump();
    }

    /// Simule une réponse heartbeat de l'agent (champs JSON bruts)
    pub fn send_heartbeat(&mut self, server_id: &str, mut fields: serde_json::Value) {
        let obj = fields.as_object_mut().expect("heartbeat fields must be an object");
        obj.insert("type".into(), serde_json::json!("heartbeat_response"));
        obj.entry("server_id".to_string())
            .or_insert_with(|| serde_json::json!(server_id));
        let payload = fields.to_string();
        self.stub.simulate_frame(server_id, &payload);
        self.pump();
    }

    pub fn start(&self, server_id: &str) -> Result<(), SupervisorError> {
        let entry = self.registry.get(server_id).expect("unknown server in harness");
        self.supervisor.start(&entry)
    }

    pub fn stop(&self, server_id: &str) -> Result<(), SupervisorError> {
        let entry = self.registry.get(server_id).expect("unknown server in harness");
        self.supervisor.stop(&entry)
    }

    // Assertions de lecture

    pub fn lifecycle_of(&self, server_id: &str) -> LifecycleState {
        self.entry(server_id).runtime.lock().lifecycle
    }

    pub fn has_start_time(&self, server_id: &str) -> bool {
        self.entry(server_id).runtime.lock().start_time.is_some()
    }

    pub fn metrics_of(&self, server_id: &str) -> Option<MetricsSnapshot> {
        self.entry(server_id).runtime.lock().metrics
    }

    pub fn players_of(&self, server_id: &str) -> Vec<String> {
        self.entry(server_id).runtime.lock().players_online.iter().cloned().collect()
    }

    pub fn is_connected(&self, server_id: &str) -> bool {
        self.entry(server_id).runtime.lock().connected
    }

    fn entry(&self, server_id: &str) -> Arc<ServerEntry> {
        self.registry.get(server_id).expect("unknown server in harness")
    }
}

impl Default for FleetHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn default_server_conf() -> ServerConf {
    serde_json::from_value(serde_json::json!({})).expect("empty server conf")
}
