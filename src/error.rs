//! Coordinator error taxonomy
//!
//! Every Boundary API operation returns these as explicit values.

use crate::persistence::PersistenceError;
use crate::types::{NodeStatus, TaskStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a node refused an assignment push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    AtCapacity,
    Duplicate,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::AtCapacity => write!(f, "at capacity"),
            RejectionReason::Duplicate => write!(f, "already holds task"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Registration of node {node_id} rejected: {reason}")]
    Registration { node_id: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Task {0} already exists")]
    DuplicateTask(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Node {node_id} cannot take work while {status}")]
    NodeUnavailable { node_id: String, status: NodeStatus },

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task_id} is not held by node {node_id}")]
    NotAssignedToNode { task_id: String, node_id: String },

    #[error("Node {node_id} rejected task {task_id}: {reason}")]
    AssignmentRejected {
        node_id: String,
        task_id: String,
        reason: RejectionReason,
    },

    #[error("Communication with node {node_id} failed: {message}")]
    Communication { node_id: String, message: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl CoordinatorError {
    /// Stable machine-readable category, used by the HTTP layer
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::Registration { .. } => "rejected",
            CoordinatorError::InvalidRequest(_) => "invalid_request",
            CoordinatorError::DuplicateTask(_) => "duplicate",
            CoordinatorError::TaskNotFound(_) | CoordinatorError::NodeNotFound(_) => "not_found",
            CoordinatorError::InvalidTransition { .. }
            | CoordinatorError::NotAssignedToNode { .. } => "invalid_transition",
            CoordinatorError::NodeUnavailable { .. } => "node_unavailable",
            CoordinatorError::AssignmentRejected { .. } => "assignment_rejected",
            CoordinatorError::Communication { .. } => "communication",
            CoordinatorError::Persistence(_) => "persistence",
        }
    }
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
