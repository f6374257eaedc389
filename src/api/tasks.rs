use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::{AppError, AppState};
use crate::coordinator::{StatusReport, Submitted, TaskSubmission};
use crate::error::CoordinatorError;
use crate::registry::TransitionOutcome;
use crate::types::{Task, TaskStatus};

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub status: Option<String>,
}

/// POST /api/tasks
pub async fn submit_task(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Result<(StatusCode, Json<Submitted>), AppError> {
    let submitted = state.coordinator.submit_task(submission).await?;
    Ok((StatusCode::CREATED, Json(submitted)))
}

/// GET /api/tasks?status=
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<Task>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(CoordinatorError::InvalidRequest)?;
    Ok(Json(state.coordinator.list_tasks(status).await))
}

/// GET /api/tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.coordinator.get_task(&task_id).await?))
}

/// PUT /api/tasks/:task_id/status
pub async fn update_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(report): Json<StatusReport>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(
        state.coordinator.update_task_status(&task_id, report).await?,
    ))
}

/// DELETE /api/tasks/:task_id
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TransitionOutcome>, AppError> {
    Ok(Json(state.coordinator.cancel_task(&task_id).await?))
}
