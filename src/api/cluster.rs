use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::AppState;
use crate::coordinator::{ClusterStatus, QueueStatus};
use crate::observability::CoordinatorStats;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/cluster/status
pub async fn cluster_status(State(state): State<AppState>) -> Json<ClusterStatus> {
    Json(state.coordinator.get_cluster_status().await)
}

/// GET /api/queue/status
pub async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.coordinator.get_queue_status().await)
}

/// GET /api/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<CoordinatorStats> {
    Json(state.coordinator.get_metrics())
}
