//! Scénarios bout-en-bout sur le Heartbeat Engine via le harness devkit.
//!
//! Chaque scénario rejoue une séquence opérateur/agent complète :
//! commande → intention posée → réponse heartbeat → état confirmé.

use forgefleet_devkit::FleetHarness;
use forgefleet_kernel::models::LifecycleState;
use serde_json::json;

#[test]
fn full_start_cycle_confirmed_by_heartbeat() {
    let mut harness = FleetHarness::new();
    harness.register_server("s1");
    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Offline);

    // start : intention posée, start_time optimiste
    harness.start("s1").unwrap();
    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Starting);
    assert!(harness.has_start_time("s1"));

    // l'agent se connecte puis confirme avec un rapport complet
    harness.connect("s1");
    harness.send_heartbeat(
        "s1",
        json!({
            "is_running": true,
            "tps": 19.98,
            "cpu_usage": 12.5,
            "ram_usage_mb": 512.0,
            "players_online": ["alice"],
            "max_players": 20
        }),
    );

    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Online);
    let metrics = harness.metrics_of("s1").unwrap();
    assert_eq!(metrics.tps, 19.98);
    assert_eq!(metrics.cpu_usage, 12.5);
    assert_eq!(metrics.ram_usage_mb, 512.0);
    assert_eq!(harness.players_of("s1"), vec!["alice"]);
}

#[test]
fn full_stop_cycle_keeps_metrics_clears_start_time() {
    let mut harness = FleetHarness::new();
    harness.register_server("s1");

    harness.start("s1").unwrap();
    harness.connect("s1");
    harness.send_heartbeat(
        "s1",
        json!({
            "is_running": true,
            "tps": 20.0,
            "cpu_usage": 8.0,
            "ram_usage_mb": 420.0
        }),
    );
    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Online);

    // stop : intention posée, l'uptime reste lisible pendant l'arrêt
    harness.stop("s1").unwrap();
    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Stopping);
    assert!(harness.has_start_time("s1"));

    // confirmation : is_running=false sans métriques
    harness.send_heartbeat("s1", json!({ "is_running": false }));
    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Offline);
    assert!(!harness.has_start_time("s1"));
    // le message sans champs métriques n'a pas touché le snapshot
    assert_eq!(harness.metrics_of("s1").unwrap().tps, 20.0);
}

#[test]
fn disconnect_during_stop_versus_crash() {
    let mut harness = FleetHarness::new();
    harness.register_server("stopping-one");
    harness.register_server("crashing-one");

    for id in ["stopping-one", "crashing-one"] {
        harness.start(id).unwrap();
        harness.connect(id);
        harness.send_heartbeat(id, json!({ "is_running": true }));
    }

    // perte de canal pendant un stop : arrêt propre
    harness.stop("stopping-one").unwrap();
    harness.disconnect("stopping-one");
    assert_eq!(harness.lifecycle_of("stopping-one"), LifecycleState::Offline);

    // perte de canal en plein vol : crash
    harness.disconnect("crashing-one");
    assert_eq!(harness.lifecycle_of("crashing-one"), LifecycleState::Crashed);
    assert!(!harness.has_start_time("crashing-one"));

    // un start opérateur est le chemin de récupération après crash
    harness.start("crashing-one").unwrap();
    assert_eq!(harness.lifecycle_of("crashing-one"), LifecycleState::Starting);
}

#[test]
fn one_dead_channel_never_aborts_the_round() {
    let mut harness = FleetHarness::new();
    for id in ["a", "b", "c"] {
        harness.register_server(id);
    }
    harness.stub.fail_sends_to("b");

    harness.tick();

    let reached: Vec<String> =
        harness.stub.sent_frames().iter().map(|f| f.server_id.clone()).collect();
    assert_eq!(reached, vec!["a", "c"]);
    assert_eq!(harness.lifecycle_of("b"), LifecycleState::Offline);
    assert!(!harness.is_connected("b"));
}

#[test]
fn duplicate_response_is_idempotent() {
    let mut harness = FleetHarness::new();
    harness.register_server("s1");

    let report = json!({
        "is_running": true,
        "tps": 19.5,
        "cpu_usage": 30.0,
        "ram_usage_mb": 1024.0,
        "players_online": ["alice", "bob"],
        "max_players": 50
    });
    harness.send_heartbeat("s1", report.clone());
    let metrics_first = harness.metrics_of("s1").unwrap();
    let players_first = harness.players_of("s1");

    // le même rapport rejoué (bus at-least-once) ne change rien
    harness.send_heartbeat("s1", report);
    assert_eq!(harness.metrics_of("s1").unwrap(), metrics_first);
    assert_eq!(harness.players_of("s1"), players_first);
    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Online);
}

#[test]
fn explicit_state_field_wins_over_boolean() {
    let mut harness = FleetHarness::new();
    harness.register_server("s1");

    // l'agent décrit starting alors que is_running est déjà true
    harness.send_heartbeat("s1", json!({ "is_running": true, "server_state": "starting" }));
    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Starting);
    assert!(harness.has_start_time("s1"));

    harness.send_heartbeat("s1", json!({ "is_running": true }));
    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Online);
}

#[test]
fn stale_and_malformed_frames_are_inert() {
    let mut harness = FleetHarness::new();
    harness.register_server("s1");
    harness.send_heartbeat("s1", json!({ "is_running": true }));

    // trame d'un serveur jamais enregistré : loggée puis ignorée
    harness.stub.simulate_frame("ghost", r#"{"type":"heartbeat_response","server_id":"ghost","is_running":true}"#);
    // trame illisible sur un canal valide
    harness.stub.simulate_frame("s1", "definitely not json");
    harness.pump();

    assert_eq!(harness.lifecycle_of("s1"), LifecycleState::Online);
    assert!(harness.registry.get("ghost").is_none());
}
