//! Node-facing handlers: registration, heartbeats and operator actions

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use super::{AppError, AppState};
use crate::coordinator::{HeartbeatReport, Requeued};
use crate::registry::{HeartbeatOutcome, RegisterOutcome};
use crate::types::{AgentNode, NodeRegistration};

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub node_id: String,
    pub outcome: RegisterOutcome,
}

/// POST /api/nodes/register
pub async fn register_node(
    State(state): State<AppState>,
    Json(registration): Json<NodeRegistration>,
) -> Result<Json<RegisterResponse>, AppError> {
    let node_id = registration.node_id.clone();
    let outcome = state.coordinator.register_node(registration).await?;
    Ok(Json(RegisterResponse { node_id, outcome }))
}

/// DELETE /api/nodes/:node_id/unregister
pub async fn unregister_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Requeued>, AppError> {
    Ok(Json(state.coordinator.unregister_node(&node_id).await?))
}

/// POST /api/nodes/:node_id/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(report): Json<HeartbeatReport>,
) -> Result<Json<HeartbeatOutcome>, AppError> {
    Ok(Json(state.coordinator.heartbeat(&node_id, report).await?))
}

/// GET /api/nodes
pub async fn list_nodes(State(state): State<AppState>) -> Json<Vec<AgentNode>> {
    Json(state.coordinator.list_nodes().await)
}

/// GET /api/nodes/:node_id
pub async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<AgentNode>, AppError> {
    Ok(Json(state.coordinator.get_node(&node_id).await?))
}

/// POST /api/nodes/:node_id/maintenance
pub async fn set_maintenance(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Requeued>, AppError> {
    Ok(Json(state.coordinator.set_node_maintenance(&node_id).await?))
}

/// POST /api/nodes/:node_id/online
pub async fn set_online(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<AgentNode>, AppError> {
    Ok(Json(state.coordinator.set_node_online(&node_id).await?))
}
