// API REST FORGEFLEET - Surface HTTP/WS du kernel
//
// RÔLE :
// Ce module expose l'API réseau consommée par l'outillage opérateur et par
// les agents embarqués dans les serveurs gérés.
//
// FONCTIONNEMENT :
// - Serveur Axum, routes /api/* + canal websocket /ws/{server_id}/{token}
// - lecture : snapshots du Registry sérialisés en JSON
// - écriture : start/stop via le superviseur, sessions joueur via /api/logs
// - Sérialisation JSON automatique des réponses
//
// SÉCURITÉ :
// - websocket : token vérifié en temps constant AVANT tout traitement de
//   trame, fermeture code 1008 sinon
// - /api/logs et /api/plugin : 401 sur token invalide, jamais transmis
//   au Registry
// - les routes opérateur start/stop restent sur le réseau de confiance

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::auth::TokenStore;
use crate::models::{LifecycleState, ServerEntry};
use crate::registry::ServerRegistry;
use crate::sessions::{SessionError, SessionTracker};
use crate::supervisor::{ProcessSupervisor, SupervisorError};
use crate::transport::direct::DirectTransport;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServerRegistry>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub tokens: Arc<TokenStore>,
    pub sessions: Arc<SessionTracker>,
    /// Présent uniquement en déploiement direct ; None => variante bus
    pub direct: Option<Arc<DirectTransport>>,
}

/// Snapshot API d'un serveur : identité + état runtime complet
#[derive(Debug, serde::Serialize)]
pub struct ServerView {
    pub server_id: String,
    pub name: String,
    pub address: String,
    pub server_type: String,
    pub software: String,
    pub version: String,
    pub lifecycle: LifecycleState,
    pub connected: bool,
    pub start_time: Option<String>,
    pub uptime_seconds: Option<u64>,
    pub tps: Option<f64>,
    pub cpu_usage: Option<f64>,
    pub ram_usage_mb: Option<f64>,
    pub players_online: Vec<String>,
    pub max_players: u32,
    pub plugins: Vec<String>,
    pub last_output: Vec<String>,
}

fn to_view(entry: &ServerEntry) -> ServerView {
    // un seul verrou : le snapshot est cohérent, jamais de tuple à moitié écrit
    let rt = entry.runtime.lock();
    let now = OffsetDateTime::now_utc();
    ServerView {
        server_id: entry.server_id.clone(),
        name: entry.name.clone(),
        address: entry.address(),
        server_type: entry.server_type.clone(),
        software: entry.software.clone(),
        version: entry.version.clone(),
        lifecycle: rt.lifecycle,
        connected: rt.connected,
        start_time: rt.start_time.and_then(|t| t.format(&Rfc3339).ok()),
        uptime_seconds: rt.uptime_seconds(now),
        tps: rt.metrics.map(|m| m.tps),
        cpu_usage: rt.metrics.map(|m| m.cpu_usage),
        ram_usage_mb: rt.metrics.map(|m| m.ram_usage_mb),
        players_online: rt.players_online.iter().cloned().collect(),
        max_players: rt.max_players,
        plugins: rt.plugins.clone(),
        last_output: rt.last_output.iter().cloned().collect(),
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/servers", get(get_servers))
        .route("/api/server/{id}", get(get_server))
        .route("/api/server/{id}/start", post(start_server))
        .route("/api/server/{id}/stop", post(stop_server))
        .route("/api/logs/{server_id}/{auth_token}", post(post_log_event))
        .route("/api/plugin/{server_id}/{auth_token}", post(post_plugin_event))
        .route("/ws/{server_id}/{auth_token}", get(ws_heartbeat))
        .with_state(app_state)
}

async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// GET /api/servers (liste)
async fn get_servers(State(app): State<AppState>) -> Json<Vec<ServerView>> {
    let list: Vec<ServerView> = app.registry.list().iter().map(|e| to_view(e)).collect();
    Json(list)
}

// GET /api/server/{id} (détail)
async fn get_server(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServerView>, StatusCode> {
    let Some(entry) = app.registry.get(&id) else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(Json(to_view(&entry)))
}

// POST /api/server/{id}/start
async fn start_server(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    supervise(&app, &id, |sup, entry| sup.start(entry))
}

// POST /api/server/{id}/stop
async fn stop_server(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    supervise(&app, &id, |sup, entry| sup.stop(entry))
}

fn supervise(
    app: &AppState,
    id: &str,
    op: impl FnOnce(&ProcessSupervisor, &ServerEntry) -> Result<(), SupervisorError>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(entry) = app.registry.get(id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "ok": false, "msg": "unknown server" })),
        );
    };
    match op(&app.supervisor, &entry) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "ok": true }))),
        Err(e) => {
            let code = match e {
                SupervisorError::AlreadyRunning(_) | SupervisorError::NotRunning(_) => {
                    StatusCode::CONFLICT
                }
                // le mécanisme plateforme a échoué, pas le kernel
                SupervisorError::Launch { .. } | SupervisorError::Stop { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            };
            (code, Json(serde_json::json!({ "ok": false, "msg": e.to_string() })))
        }
    }
}

/// Corps d'un événement join/leave posté par un agent serveur
#[derive(Debug, Deserialize)]
struct LogEventBody {
    #[serde(rename = "playerName")]
    player_name: Option<String>,
    uuid: Option<String>,
    action: Option<String>,
    #[serde(default)]
    forced: bool,
}

// POST /api/logs/{server_id}/{auth_token}
async fn post_log_event(
    State(app): State<AppState>,
    Path((server_id, auth_token)): Path<(String, String)>,
    Json(body): Json<LogEventBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !app.tokens.verify(&server_id, &auth_token) {
        eprintln!("[http] log event auth failed for {server_id}");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "ok": false, "msg": "invalid token" })),
        );
    }

    let Some(player_name) = body.player_name.as_deref().filter(|n| !n.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "ok": false, "msg": "playerName missing" })),
        );
    };
    // uuid absent : l'agent minimal identifie par le nom
    let uuid = body.uuid.as_deref().unwrap_or(player_name);
    let now = OffsetDateTime::now_utc();

    let result = match body.action.as_deref() {
        Some("join") => app
            .sessions
            .record_join(&server_id, player_name, uuid, now)
            .map(|()| serde_json::json!({ "ok": true })),
        Some("leave") => app
            .sessions
            .record_leave(&server_id, player_name, uuid, now, body.forced)
            .map(|session| {
                serde_json::json!({ "ok": true, "duration_seconds": session.duration_seconds })
            }),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "ok": false, "msg": "action must be join or leave" })),
            )
        }
    };

    match result {
        Ok(payload) => (StatusCode::OK, Json(payload)),
        Err(SessionError::NoOpenSession(p)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "ok": false, "msg": format!("no open session for {p}") })),
        ),
        Err(e) => {
            eprintln!("[http] session record failed for {server_id}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "ok": false, "msg": "storage error" })),
            )
        }
    }
}

// POST /api/plugin/{server_id}/{auth_token}
// Relais générique d'événements plugin ; le payload reçu est toujours
// renvoyé en écho. Les événements reconnus mettent l'entrée à jour.
async fn post_plugin_event(
    State(app): State<AppState>,
    Path((server_id, auth_token)): Path<(String, String)>,
    Json(payload): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !app.tokens.verify(&server_id, &auth_token) {
        eprintln!("[http] plugin event auth failed for {server_id}");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "ok": false, "msg": "invalid token" })),
        );
    }

    apply_plugin_event(&app.registry, &server_id, &payload);
    (StatusCode::OK, Json(payload))
}

/// Événements plugin connus : liste de plugins, ligne de sortie process.
/// Tout le reste est relayé sans effet.
fn apply_plugin_event(registry: &ServerRegistry, server_id: &str, payload: &serde_json::Value) {
    let Some(entry) = registry.get(server_id) else {
        eprintln!("[http] plugin event for unknown server {server_id}, dropped");
        return;
    };
    match payload.get("event").and_then(|v| v.as_str()) {
        Some("plugins") => {
            let plugins: Vec<String> = payload
                .get("plugins")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
                })
                .unwrap_or_default();
            entry.runtime.lock().plugins = plugins;
        }
        Some("output") => {
            if let Some(line) = payload.get("line").and_then(|v| v.as_str()) {
                entry.runtime.lock().push_output(line.to_string());
            }
        }
        _ => {}
    }
}

// GET /ws/{server_id}/{auth_token} (canal heartbeat bidirectionnel)
async fn ws_heartbeat(
    State(app): State<AppState>,
    Path((server_id, auth_token)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(app, server_id, auth_token, socket))
}

async fn handle_socket(app: AppState, server_id: String, auth_token: String, mut socket: WebSocket) {
    // auth avant toute trame : fermeture 1008 sur token invalide
    if !app.tokens.verify(&server_id, &auth_token) {
        eprintln!("[http] websocket auth failed for {server_id}");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "invalid token".into(),
            })))
            .await;
        return;
    }

    let Some(direct) = app.direct.clone() else {
        // déploiement bus : le canal websocket n'est pas en service
        eprintln!("[http] websocket refused for {server_id}: bus transport active");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::UNSUPPORTED,
                reason: "direct transport disabled".into(),
            })))
            .await;
        return;
    };

    let (conn_id, mut outbound) = direct.register(&server_id);
    let (mut sink, mut stream) = socket.split();

    // pompe sortante : requêtes heartbeat du moteur vers le socket
    let pump = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(txt) => direct.deliver(&server_id, txt.as_str().to_string()),
            Message::Close(_) => break,
            _ => {}
        }
    }

    pump.abort();
    direct.unregister(&server_id, conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConf;
    use crate::models::MetricsSnapshot;
    use std::path::PathBuf;

    fn registry_with(id: &str) -> Arc<ServerRegistry> {
        let registry = Arc::new(ServerRegistry::new());
        let conf: ServerConf =
            serde_yaml::from_str("server_name: Lobby-1\nserver_type: Lobby\n").unwrap();
        registry
            .register(ServerEntry::from_conf(id, conf, PathBuf::from("lobby-1.yml")))
            .unwrap();
        registry
    }

    #[test]
    fn view_reflects_runtime_snapshot() {
        let registry = registry_with("lobby-1");
        let entry = registry.get("lobby-1").unwrap();
        {
            let mut rt = entry.runtime.lock();
            rt.lifecycle = LifecycleState::Online;
            rt.connected = true;
            rt.start_time = Some(OffsetDateTime::now_utc());
            rt.metrics = Some(MetricsSnapshot::rounded(19.98, 12.5, 512.0));
            rt.players_online = ["alice".to_string()].into_iter().collect();
            rt.max_players = 20;
        }

        let view = to_view(&entry);
        assert_eq!(view.server_id, "lobby-1");
        assert_eq!(view.name, "Lobby-1");
        assert_eq!(view.lifecycle, LifecycleState::Online);
        assert_eq!(view.tps, Some(19.98));
        assert_eq!(view.players_online, vec!["alice"]);
        assert!(view.uptime_seconds.is_some());
    }

    #[test]
    fn view_of_offline_server_has_no_uptime() {
        let registry = registry_with("lobby-1");
        let view = to_view(&registry.get("lobby-1").unwrap());
        assert_eq!(view.lifecycle, LifecycleState::Offline);
        assert!(view.start_time.is_none());
        assert!(view.uptime_seconds.is_none());
        assert!(view.tps.is_none());
    }

    #[test]
    fn plugin_event_updates_plugin_list_and_output() {
        let registry = registry_with("lobby-1");
        apply_plugin_event(
            &registry,
            "lobby-1",
            &serde_json::json!({ "event": "plugins", "plugins": ["Essentials", "WorldEdit"] }),
        );
        apply_plugin_event(
            &registry,
            "lobby-1",
            &serde_json::json!({ "event": "output", "line": "[INFO] Done (3.2s)" }),
        );
        let entry = registry.get("lobby-1").unwrap();
        let rt = entry.runtime.lock();
        assert_eq!(rt.plugins, vec!["Essentials", "WorldEdit"]);
        assert_eq!(rt.last_output.back().unwrap(), "[INFO] Done (3.2s)");
    }

    #[test]
    fn unknown_plugin_event_is_relayed_without_effect() {
        let registry = registry_with("lobby-1");
        apply_plugin_event(
            &registry,
            "lobby-1",
            &serde_json::json!({ "event": "fireworks", "count": 3 }),
        );
        let entry = registry.get("lobby-1").unwrap();
        assert!(entry.runtime.lock().plugins.is_empty());
    }
}
