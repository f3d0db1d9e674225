/*!
CAMLINK KERNEL - Point d'entrée principal du serveur CamLink

RÔLE : assemble config, flotte d'agents MQTT, nœud local, orchestrateur de
sondes, déclencheurs (timer + online/offline) et API HTTP.

ARCHITECTURE : event-driven via MQTT + API REST + rafraîchissement périodique.
UTILITÉ : source unique de la liste des caméras branchées sur la flotte.
*/

use anyhow::Context;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use camlink_kernel::agents::{AgentRegistry, CommandDispatcher, SharedAgentRegistry};
use camlink_kernel::axis::AvailableDevicesAxis;
use camlink_kernel::config::load_config;
use camlink_kernel::health::HealthTracker;
use camlink_kernel::http::{build_router, AppState};
use camlink_kernel::lifecycle::NodeLifecycleListener;
use camlink_kernel::local::LocalNode;
use camlink_kernel::mqtt;
use camlink_kernel::scheduler::PeriodicLister;
use camlink_kernel::{FetchOrchestrator, InventoryStore, Node, NodeProbe, RefreshSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await;
    let shutdown = CancellationToken::new();
    let health = HealthTracker::new();

    let probe = Arc::new(NodeProbe::new(&cfg.probe).context("invalid camera pattern in config")?);
    let store = Arc::new(InventoryStore::new());

    // Client MQTT partagé : commandes sortantes + listener
    let (client, eventloop) = mqtt::create_mqtt_client(&cfg.mqtt);
    let dispatcher = CommandDispatcher::new(client.clone());

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let mut registry = AgentRegistry::new(dispatcher, cfg.refresh.probe_timeout()).with_events(events_tx);
    if cfg.local_node.enabled {
        let local = LocalNode::new(cfg.local_node.name.as_str());
        info!("[kernel] local node {} ({})", cfg.local_node.name, local.os_family());
        registry = registry.with_local_node(Arc::new(local));
    }
    let agents: SharedAgentRegistry = Arc::new(registry);

    let orchestrator = Arc::new(FetchOrchestrator::new(
        agents.clone(),
        probe,
        store,
        RefreshSettings {
            probe_timeout: cfg.refresh.probe_timeout(),
            max_concurrency: cfg.refresh.max_concurrency,
        },
    ));

    mqtt::spawn_mqtt_listener(client, eventloop, agents.clone(), health.clone(), shutdown.clone());
    AgentRegistry::spawn_monitor(
        agents.clone(),
        cfg.agents.offline_after(),
        cfg.agents.sweep_interval(),
        shutdown.clone(),
    );
    NodeLifecycleListener::new(orchestrator.clone()).spawn(events_rx, shutdown.clone());
    PeriodicLister::new(orchestrator.clone(), cfg.refresh.period()).spawn(shutdown.clone());

    let app_state = AppState {
        orchestrator,
        agents,
        health,
        axis: Arc::new(Mutex::new(AvailableDevicesAxis::new())),
        api_key: std::env::var("CAMLINK_API_KEY").ok(),
    };
    if app_state.api_key.as_deref().unwrap_or_default().is_empty() {
        warn!("SECURITY: CAMLINK_API_KEY not set - API access denied");
    }

    let app = build_router(app_state);
    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("[kernel] listening on http://{}", cfg.http.bind);

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("[kernel] cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            info!("[kernel] shutting down");
            stop.cancel();
        })
        .await
        .context("HTTP server failed")?;

    info!("[kernel] shut down");
    Ok(())
}
