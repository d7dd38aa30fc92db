/**
 * HEARTBEAT ENGINE - Supervision de la flotte par battement de cœur
 *
 * RÔLE :
 * Le cœur du kernel. Émet périodiquement une requête heartbeat vers chaque
 * serveur enregistré, réconcilie les réponses asynchrones dans le Registry,
 * et distingue un crash d'un arrêt volontaire.
 *
 * FONCTIONNEMENT :
 * - machine à états par entrée : offline → starting → online → stopping →
 *   offline, ou → crashed sur déconnexion inattendue
 * - boucle de requêtes sur un intervalle fixe, annulable via watch channel ;
 *   l'échec d'envoi vers un serveur n'avorte jamais le tour des autres
 * - application des réponses en last-write-wins par serveur ; une réponse
 *   dupliquée ou en retard ré-applique la même mise à jour idempotente
 * - le silence n'est pas un échec : aucune transition sur simple timeout,
 *   seul un disconnect transport ou un rapport explicite change l'état
 *
 * RÈGLES DE RÉCONCILIATION (ordre d'application) :
 * 1. server_id inconnu => log + rejet
 * 2. server_state explicite connu adopté tel quel, sinon online/offline
 *    déduit de is_running
 * 3. start_time : posé à l'entrée en état running (valeur rapportée si
 *    parseable, sinon horloge locale), effacé à la sortie
 * 4. métriques tout-ou-rien : les trois champs présents ou aucun appliqué
 * 5. players_online/max_players appliqués à chaque réponse
 */

use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;

use crate::models::{HeartbeatMessage, HeartbeatReport, LifecycleState};
use crate::registry::ServerRegistry;
use crate::transport::{EventReceiver, HeartbeatTransport, TransportEvent};

pub struct HeartbeatEngine {
    registry: Arc<ServerRegistry>,
    transport: Arc<dyn HeartbeatTransport>,
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl HeartbeatEngine {
    pub fn new(
        registry: Arc<ServerRegistry>,
        transport: Arc<dyn HeartbeatTransport>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { registry, transport, interval, shutdown_tx }
    }

    /// Démarre les deux activités du moteur : la boucle de requêtes et le
    /// handler d'événements transport. Elles ne convergent que sur le Registry.
    pub fn start(self: Arc<Self>, mut events: EventReceiver) {
        println!(
            "[heartbeat] engine started ({} transport, interval {}s)",
            self.transport.label(),
            self.interval.as_secs()
        );

        let engine = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => engine.run_round(),
                    _ = shutdown.changed() => {
                        println!("[heartbeat] request loop stopped");
                        break;
                    }
                }
            }
        });

        let engine = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    ev = events.recv() => match ev {
                        Some(ev) => engine.handle_event(ev),
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        // les événements en vol pendant le teardown sont
                        // simplement abandonnés, jamais une erreur
                        println!("[heartbeat] event handler stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Arrête l'ordonnancement de nouveaux tours (borné par un sleep en vol)
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Un tour de heartbeat : une requête vers chaque serveur enregistré.
    /// Un échec d'envoi marque l'entrée concernée offline et le tour continue.
    pub fn run_round(&self) {
        let timestamp = now_rfc3339();
        let request = HeartbeatMessage::HeartbeatRequest { timestamp };
        let Ok(payload) = serde_json::to_string(&request) else {
            return;
        };

        for entry in self.registry.list() {
            if let Err(e) = self.transport.send(&entry.server_id, &payload) {
                eprintln!("[heartbeat] send to {} failed: {e}", entry.server_id);
                let mut rt = entry.runtime.lock();
                rt.connected = false;
                rt.lifecycle = LifecycleState::Offline;
                rt.start_time = None;
            }
        }
    }

    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { server_id } => self.handle_connected(&server_id),
            TransportEvent::Message { server_id, payload } => {
                self.handle_payload(&server_id, &payload)
            }
            TransportEvent::Disconnected { server_id } => self.handle_disconnect(&server_id),
        }
    }

    fn handle_connected(&self, server_id: &str) {
        match self.registry.get(server_id) {
            Some(entry) => entry.runtime.lock().connected = true,
            None => eprintln!("[heartbeat] channel for unknown server {server_id}"),
        }
    }

    /// Parse une trame entrante. Tout JSON non reconnu est loggé puis ignoré.
    fn handle_payload(&self, server_id: &str, payload: &str) {
        match serde_json::from_str::<HeartbeatMessage>(payload) {
            Ok(HeartbeatMessage::HeartbeatResponse(report)) => {
                if report.server_id != server_id {
                    // le canal fait foi, il a été authentifié ou démultiplexé
                    eprintln!(
                        "[heartbeat] report from {server_id} claims id '{}', channel id kept",
                        report.server_id
                    );
                }
                self.apply_report(server_id, &report);
            }
            Ok(HeartbeatMessage::HeartbeatRequest { .. }) => {
                eprintln!("[heartbeat] unexpected request frame from {server_id}, dropped");
            }
            Err(e) => {
                eprintln!("[heartbeat] unparseable frame from {server_id}: {e}");
            }
        }
    }

    /// Applique une réponse heartbeat à l'entrée visée (cf. règles en tête)
    pub fn apply_report(&self, server_id: &str, report: &HeartbeatReport) {
        let Some(entry) = self.registry.get(server_id) else {
            eprintln!("[heartbeat] response from unknown server {server_id}, dropped");
            return;
        };

        let target = report
            .server_state
            .as_deref()
            .and_then(LifecycleState::parse)
            .unwrap_or(if report.is_running {
                LifecycleState::Online
            } else {
                LifecycleState::Offline
            });

        let mut rt = entry.runtime.lock();
        rt.connected = true;

        if target.is_running() {
            if rt.start_time.is_none() {
                rt.start_time = report
                    .start_time
                    .as_deref()
                    .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
                    .or_else(|| Some(OffsetDateTime::now_utc()));
            }
        } else {
            rt.start_time = None;
        }

        if let (Some(tps), Some(cpu), Some(ram)) = (report.tps, report.cpu_usage, report.ram_usage_mb)
        {
            rt.metrics = Some(crate::models::MetricsSnapshot::rounded(tps, cpu, ram));
        }

        rt.players_online = report.players_online.iter().cloned().collect();
        rt.max_players = report.max_players;

        rt.lifecycle = target;
    }

    /// Perte de canal : attendue pendant un stop, crash sinon
    pub fn handle_disconnect(&self, server_id: &str) {
        let Some(entry) = self.registry.get(server_id) else {
            eprintln!("[heartbeat] disconnect for unknown server {server_id}, dropped");
            return;
        };
        let mut rt = entry.runtime.lock();
        rt.connected = false;
        rt.start_time = None;
        rt.lifecycle = if rt.lifecycle == LifecycleState::Stopping {
            println!("[heartbeat] {server_id} confirmed stopped");
            LifecycleState::Offline
        } else {
            eprintln!("[heartbeat] {server_id} lost unexpectedly, marked crashed");
            LifecycleState::Crashed
        };
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConf;
    use crate::models::ServerEntry;
    use crate::transport::TransportError;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::path::PathBuf;

    /// Transport de test : enregistre les envois, échoue pour les ids choisis
    struct TestTransport {
        sent: Mutex<Vec<(String, String)>>,
        failing: Mutex<HashSet<String>>,
    }

    impl TestTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self { sent: Mutex::new(Vec::new()), failing: Mutex::new(HashSet::new()) })
        }

        fn fail_for(&self, server_id: &str) {
            self.failing.lock().insert(server_id.to_string());
        }

        fn sent_to(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(id, _)| id.clone()).collect()
        }
    }

    impl HeartbeatTransport for TestTransport {
        fn send(&self, server_id: &str, payload: &str) -> Result<(), TransportError> {
            if self.failing.lock().contains(server_id) {
                return Err(TransportError::NotConnected(server_id.to_string()));
            }
            self.sent.lock().push((server_id.to_string(), payload.to_string()));
            Ok(())
        }

        fn label(&self) -> &'static str {
            "test"
        }
    }

    fn fixture(ids: &[&str]) -> (Arc<ServerRegistry>, Arc<TestTransport>, HeartbeatEngine) {
        let registry = Arc::new(ServerRegistry::new());
        for id in ids {
            let conf: ServerConf = serde_yaml::from_str("{}").unwrap();
            registry
                .register(ServerEntry::from_conf(id, conf, PathBuf::from(format!("{id}.yml"))))
                .unwrap();
        }
        let transport = TestTransport::new();
        let engine = HeartbeatEngine::new(
            registry.clone(),
            transport.clone(),
            Duration::from_secs(10),
        );
        (registry, transport, engine)
    }

    fn report(server_id: &str, is_running: bool) -> HeartbeatReport {
        HeartbeatReport {
            server_id: server_id.to_string(),
            is_running,
            server_state: None,
            start_time: None,
            tps: None,
            cpu_usage: None,
            ram_usage_mb: None,
            players_online: vec![],
            max_players: 0,
        }
    }

    #[test]
    fn start_time_tracks_running_state() {
        let (registry, _t, engine) = fixture(&["s1"]);

        engine.apply_report("s1", &report("s1", true));
        let entry = registry.get("s1").unwrap();
        assert!(entry.runtime.lock().start_time.is_some());
        assert_eq!(entry.runtime.lock().lifecycle, LifecycleState::Online);

        engine.apply_report("s1", &report("s1", false));
        assert!(entry.runtime.lock().start_time.is_none());
        assert_eq!(entry.runtime.lock().lifecycle, LifecycleState::Offline);
    }

    #[test]
    fn reported_start_time_adopted_when_parseable() {
        let (registry, _t, engine) = fixture(&["s1"]);
        let mut r = report("s1", true);
        r.start_time = Some("2026-08-06T10:00:00Z".into());
        engine.apply_report("s1", &r);

        let entry = registry.get("s1").unwrap();
        let start = entry.runtime.lock().start_time.unwrap();
        assert_eq!(start.year(), 2026);
        assert_eq!(start.hour(), 10);
    }

    #[test]
    fn garbage_start_time_falls_back_to_local_clock() {
        let (registry, _t, engine) = fixture(&["s1"]);
        let mut r = report("s1", true);
        r.start_time = Some("yesterday-ish".into());
        engine.apply_report("s1", &r);
        assert!(registry.get("s1").unwrap().runtime.lock().start_time.is_some());
    }

    #[test]
    fn explicit_server_state_overrides_boolean() {
        let (registry, _t, engine) = fixture(&["s1"]);
        let mut r = report("s1", true);
        r.server_state = Some("starting".into());
        engine.apply_report("s1", &r);
        assert_eq!(
            registry.get("s1").unwrap().runtime.lock().lifecycle,
            LifecycleState::Starting
        );

        // état inconnu : retombe sur is_running
        let mut r = report("s1", true);
        r.server_state = Some("warming-up".into());
        engine.apply_report("s1", &r);
        assert_eq!(
            registry.get("s1").unwrap().runtime.lock().lifecycle,
            LifecycleState::Online
        );
    }

    #[test]
    fn metrics_are_all_or_nothing() {
        let (registry, _t, engine) = fixture(&["s1"]);
        let entry = registry.get("s1").unwrap();

        let mut full = report("s1", true);
        full.tps = Some(19.98);
        full.cpu_usage = Some(12.5);
        full.ram_usage_mb = Some(512.0);
        engine.apply_report("s1", &full);
        let before = entry.runtime.lock().metrics.unwrap();
        assert_eq!(before.tps, 19.98);

        // 2 champs sur 3 : le snapshot précédent reste entier
        let mut partial = report("s1", true);
        partial.tps = Some(5.0);
        partial.cpu_usage = Some(99.0);
        engine.apply_report("s1", &partial);
        assert_eq!(entry.runtime.lock().metrics.unwrap(), before);
    }

    #[test]
    fn applying_same_report_twice_is_idempotent() {
        let (registry, _t, engine) = fixture(&["s1"]);
        let entry = registry.get("s1").unwrap();

        let mut r = report("s1", true);
        r.tps = Some(20.0);
        r.cpu_usage = Some(10.0);
        r.ram_usage_mb = Some(256.0);
        r.players_online = vec!["alice".into()];
        r.max_players = 20;

        engine.apply_report("s1", &r);
        let first = entry.runtime.lock().clone();
        engine.apply_report("s1", &r);
        let second = entry.runtime.lock().clone();

        assert_eq!(first.lifecycle, second.lifecycle);
        assert_eq!(first.start_time, second.start_time);
        assert_eq!(first.metrics, second.metrics);
        assert_eq!(first.players_online, second.players_online);
        assert_eq!(first.max_players, second.max_players);
    }

    #[test]
    fn unknown_server_report_is_dropped() {
        let (_registry, _t, engine) = fixture(&["s1"]);
        // ne doit pas paniquer ni créer d'entrée
        engine.apply_report("ghost", &report("ghost", true));
    }

    #[test]
    fn disconnect_while_stopping_is_a_clean_stop() {
        let (registry, _t, engine) = fixture(&["s1"]);
        registry.set_lifecycle("s1", LifecycleState::Stopping);
        engine.handle_disconnect("s1");
        let entry = registry.get("s1").unwrap();
        let rt = entry.runtime.lock();
        assert_eq!(rt.lifecycle, LifecycleState::Offline);
        assert!(!rt.connected);
        assert!(rt.start_time.is_none());
    }

    #[test]
    fn disconnect_while_online_is_a_crash() {
        let (registry, _t, engine) = fixture(&["s1"]);
        engine.apply_report("s1", &report("s1", true));
        engine.handle_disconnect("s1");
        let entry = registry.get("s1").unwrap();
        let rt = entry.runtime.lock();
        assert_eq!(rt.lifecycle, LifecycleState::Crashed);
        assert!(rt.start_time.is_none());
    }

    #[test]
    fn send_failure_marks_offline_and_round_continues() {
        let (registry, transport, engine) = fixture(&["s1", "s2", "s3"]);
        // s2 online avant la panne de canal
        engine.apply_report("s2", &report("s2", true));
        transport.fail_for("s2");

        engine.run_round();

        // les autres serveurs ont bien reçu leur requête
        assert_eq!(transport.sent_to(), vec!["s1", "s3"]);
        let rt_s2 = registry.get("s2").unwrap();
        let rt = rt_s2.runtime.lock();
        assert_eq!(rt.lifecycle, LifecycleState::Offline);
        assert!(!rt.connected);
        assert!(rt.start_time.is_none());
    }

    #[test]
    fn round_sends_wire_format_requests() {
        let (_registry, transport, engine) = fixture(&["s1"]);
        engine.run_round();
        let sent = transport.sent.lock();
        let (_, payload) = &sent[0];
        let msg: HeartbeatMessage = serde_json::from_str(payload).unwrap();
        assert!(matches!(msg, HeartbeatMessage::HeartbeatRequest { .. }));
    }

    #[test]
    fn malformed_payload_changes_nothing() {
        let (registry, _t, engine) = fixture(&["s1"]);
        engine.apply_report("s1", &report("s1", true));
        let entry = registry.get("s1").unwrap();
        let before = entry.runtime.lock().clone();

        engine.handle_payload("s1", "{not json");
        engine.handle_payload("s1", r#"{"type":"telemetry"}"#);

        let after = entry.runtime.lock().clone();
        assert_eq!(before.lifecycle, after.lifecycle);
        assert_eq!(before.start_time, after.start_time);
    }

    #[tokio::test]
    async fn shutdown_stops_scheduling() {
        let (_registry, transport, engine) = fixture(&["s1"]);
        let engine = Arc::new(engine);
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        engine.clone().start(rx);

        // premier tick immédiat
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent_before = transport.sent.lock().len();
        assert!(sent_before >= 1);

        engine.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent_after = transport.sent.lock().len();
        assert_eq!(sent_before, sent_after);
    }
}
