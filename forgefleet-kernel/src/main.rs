/**
 * FORGEFLEET KERNEL - Point d'entrée du plan de contrôle
 *
 * RÔLE : Orchestration de tous les modules : config, registry, tokens,
 * stockage, transport heartbeat, moteur, console opérateur, API HTTP.
 *
 * ARCHITECTURE : trois activités concurrentes (boucle heartbeat, événements
 * transport, surfaces opérateur) qui ne convergent que sur le Registry.
 */

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;

use forgefleet_kernel::auth::TokenStore;
use forgefleet_kernel::commands::{CommandContext, CommandRegistry};
use forgefleet_kernel::config::{self, TransportKind};
use forgefleet_kernel::heartbeat::HeartbeatEngine;
use forgefleet_kernel::http::{self, AppState};
use forgefleet_kernel::registry::ServerRegistry;
use forgefleet_kernel::sessions::SessionTracker;
use forgefleet_kernel::storage;
use forgefleet_kernel::supervisor::{ProcessSupervisor, ScreenLauncher};
use forgefleet_kernel::transport::bus::BusTransport;
use forgefleet_kernel::transport::direct::DirectTransport;
use forgefleet_kernel::transport::HeartbeatTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = config::load_settings().await;

    // registry peuplé par scan des configs serveur ; dossier illisible = fatal
    let registry = Arc::new(ServerRegistry::new());
    let count = registry
        .scan_config_dir(&settings.paths.server_config_dir)
        .await
        .context("initial config scan failed")?;
    println!("[kernel] {count} server(s) registered");

    // tokens générés une fois, jamais régénérés pour les ids existants
    let tokens = Arc::new(
        TokenStore::load(&settings.network.auth_config_path)
            .await
            .context("auth token file unreadable")?,
    );
    tokens.ensure_tokens(registry.server_ids()).await?;

    // stockage des sessions joueur derrière le trait StorageBackend
    let store = storage::open_backend(&settings.storage)?;
    let sessions = Arc::new(SessionTracker::new(store.clone()));

    let launcher = Arc::new(ScreenLauncher::new(&settings.paths.server_base_path));
    let supervisor = Arc::new(ProcessSupervisor::new(launcher));

    // une seule variante de transport active par déploiement
    let transport: Arc<dyn HeartbeatTransport>;
    let events;
    let direct: Option<Arc<DirectTransport>>;
    match settings.heartbeat.transport {
        TransportKind::Direct => {
            let (d, ev) = DirectTransport::new();
            transport = d.clone();
            events = ev;
            direct = Some(d);
        }
        TransportKind::Bus => {
            let (bus, ev) = BusTransport::spawn(&settings.mqtt, registry.server_ids());
            transport = bus;
            events = ev;
            direct = None;
        }
    }

    let engine = Arc::new(HeartbeatEngine::new(
        registry.clone(),
        transport,
        Duration::from_secs(settings.heartbeat.interval_seconds),
    ));
    engine.clone().start(events);

    // console opérateur sur stdin
    spawn_console(CommandContext { registry: registry.clone(), supervisor: supervisor.clone() });

    let app_state = AppState {
        registry,
        supervisor,
        tokens,
        sessions,
        direct,
    };
    let app = http::build_router(app_state);

    let bind = format!("{}:{}", settings.network.host, settings.network.port);
    let listener = TcpListener::bind(&bind).await.with_context(|| format!("bind {bind}"))?;
    println!("[kernel] listening on http://{bind}");

    let shutdown_engine = engine.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            println!("[kernel] shutting down");
            shutdown_engine.shutdown();
        })
        .await?;

    store.close().ok();
    Ok(())
}

/// Boucle console : une ligne = une commande de la table.
/// Les erreurs s'affichent et la session continue.
fn spawn_console(ctx: CommandContext) {
    let commands = CommandRegistry::with_defaults();
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match commands.dispatch(&ctx, &line) {
                    Ok(out) if out.is_empty() => {}
                    Ok(out) => println!("{out}"),
                    Err(e) => eprintln!("{e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    eprintln!("[kernel] console read error: {e}");
                    break;
                }
            }
        }
    });
}
