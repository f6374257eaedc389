//! REST handlers
//!
//! Node registration and heartbeats, task submission and status callbacks,
//! operator actions and read-only cluster views.

pub mod cluster;
pub mod error;
pub mod nodes;
pub mod tasks;

pub use error::AppError;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::coordinator::ClusterCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: ClusterCoordinator,
}

/// Build the API router
pub fn create_router(coordinator: ClusterCoordinator) -> Router {
    let state = AppState { coordinator };

    Router::new()
        .route("/health", get(cluster::health))
        .route("/api/cluster/status", get(cluster::cluster_status))
        .route("/api/queue/status", get(cluster::queue_status))
        .route("/api/metrics", get(cluster::metrics))
        .route("/api/nodes", get(nodes::list_nodes))
        .route("/api/nodes/register", post(nodes::register_node))
        .route("/api/nodes/:node_id", get(nodes::get_node))
        .route("/api/nodes/:node_id/unregister", delete(nodes::unregister_node))
        .route("/api/nodes/:node_id/heartbeat", post(nodes::heartbeat))
        .route("/api/nodes/:node_id/maintenance", post(nodes::set_maintenance))
        .route("/api/nodes/:node_id/online", post(nodes::set_online))
        .route("/api/tasks", post(tasks::submit_task).get(tasks::list_tasks))
        .route(
            "/api/tasks/:task_id",
            get(tasks::get_task).delete(tasks::cancel_task),
        )
        .route("/api/tasks/:task_id/status", put(tasks::update_status))
        .with_state(state)
}
