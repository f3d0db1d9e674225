/*!
# API REST CAMLINK - Serveur HTTP du kernel

RÔLE :
Expose l'inventaire des caméras et le déclencheur de rafraîchissement manuel
(le « bouton refresh » de l'UI) ainsi que l'axe de matrice `UDID`.

FONCTIONNEMENT :
- Serveur Axum avec middleware auth API key
- Routes : /health, /system/health, /agents, /cameras, /cameras/{node}, /cameras/refresh, /axis
- Sérialisation JSON des réponses

SÉCURITÉ :
- Header x-api-key obligatoire sur toutes routes sauf /health
- Refus (401) avant tout traitement métier : aucune sonde n'est lancée
*/

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::agents::{AgentRecord, SharedAgentRegistry};
use crate::axis::AvailableDevicesAxis;
use crate::error::AccessError;
use crate::health::{HealthTracker, KernelHealth};
use crate::models::NodeId;
use crate::orchestrator::FetchOrchestrator;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<FetchOrchestrator>,
    pub agents: SharedAgentRegistry,
    pub health: HealthTracker,
    pub axis: Arc<Mutex<AvailableDevicesAxis>>,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct CameraView {
    node: String,
    devices: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AxisView {
    name: &'static str,
    values: Vec<String>,
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

pub fn check_api_key(expected: Option<&str>, provided: Option<&str>) -> Result<(), AccessError> {
    let expected = match expected {
        Some(key) if !key.is_empty() => key,
        _ => return Err(AccessError::PermissionDenied("CAMLINK_API_KEY not set")),
    };
    match provided {
        Some(key) if key == expected => Ok(()),
        _ => Err(AccessError::PermissionDenied("invalid or missing x-api-key")),
    }
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AccessError> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let provided = req.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = check_api_key(app.api_key.as_deref(), provided) {
        warn!("[http] {} {} rejected: {e}", req.method(), req.uri().path());
        return Err(e);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/agents", get(list_agents))
        .route("/cameras", get(list_cameras))
        .route("/cameras/refresh", post(refresh_cameras))
        .route("/cameras/{node}", get(get_node_cameras))
        .route("/axis", get(get_axis))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.orchestrator, &app.agents))
}

// GET /agents
async fn list_agents(State(app): State<AppState>) -> Json<Vec<AgentRecord>> {
    Json(app.agents.list_agents())
}

// GET /cameras
async fn list_cameras(State(app): State<AppState>) -> Json<Vec<CameraView>> {
    let snapshot = app.orchestrator.store().get();
    let views = snapshot
        .display_names()
        .into_iter()
        .map(|(node, devices)| CameraView { node: node.to_string(), devices })
        .collect();
    Json(views)
}

// GET /cameras/{node} : nœud inconnu = zéro caméra
async fn get_node_cameras(State(app): State<AppState>, Path(node): Path<String>) -> Json<CameraView> {
    let snapshot = app.orchestrator.store().get();
    let devices = snapshot
        .devices(&NodeId::new(node.as_str()))
        .iter()
        .map(|d| d.display_name().to_string())
        .collect();
    Json(CameraView { node, devices })
}

// POST /cameras/refresh : toujours une redirection, même si des nœuds échouent
async fn refresh_cameras(State(app): State<AppState>) -> Redirect {
    app.orchestrator.refresh_all().await;
    app.axis.lock().rebuild(&app.orchestrator.store().get());
    Redirect::to("/cameras")
}

// GET /axis
async fn get_axis(State(app): State<AppState>) -> Json<AxisView> {
    let snapshot = app.orchestrator.store().get();
    let mut axis = app.axis.lock();
    axis.rebuild(&snapshot);
    Json(AxisView { name: axis.name(), values: axis.values() })
}
