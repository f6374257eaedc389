use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::CoordinatorError;

/// Axum error response wrapping the coordinator error taxonomy
#[derive(Debug)]
pub struct AppError(pub CoordinatorError);

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        AppError(err)
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self.0 {
            CoordinatorError::TaskNotFound(_) | CoordinatorError::NodeNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CoordinatorError::DuplicateTask(_)
            | CoordinatorError::InvalidTransition { .. }
            | CoordinatorError::NotAssignedToNode { .. }
            | CoordinatorError::NodeUnavailable { .. }
            | CoordinatorError::AssignmentRejected { .. } => StatusCode::CONFLICT,
            CoordinatorError::Registration { .. } | CoordinatorError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            CoordinatorError::Communication { .. } => StatusCode::BAD_GATEWAY,
            CoordinatorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = json!({
            "error": {
                "type": self.0.kind(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
