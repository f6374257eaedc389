//! Calls from the coordinator to worker nodes
//!
//! The coordinator only ever talks to a node through [`NodeClient`], which
//! keeps the scheduler and heartbeat logic testable without a network.
//! Every call is bounded by a timeout and a timeout counts as a failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use crate::config::NodeClientConfig;
use crate::error::{CoordinatorError, RejectionReason};
use crate::types::{Task, TaskPriority};

/// Body of the node's accept-task endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub task_id: String,
    pub priority: TaskPriority,
    pub requirements: BTreeSet<String>,
}

impl From<&Task> for AssignmentRequest {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            priority: task.priority,
            requirements: task.requirements.clone(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeClientError {
    #[error("Node rejected the assignment: {0}")]
    Rejected(RejectionReason),

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },
}

impl NodeClientError {
    /// Lift into the coordinator taxonomy for the given node
    pub fn into_coordinator_error(self, node_id: &str, task_id: &str) -> CoordinatorError {
        match self {
            NodeClientError::Rejected(reason) => CoordinatorError::AssignmentRejected {
                node_id: node_id.to_string(),
                task_id: task_id.to_string(),
                reason,
            },
            other => CoordinatorError::Communication {
                node_id: node_id.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Operations a node exposes to the coordinator
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Liveness check against the node's health endpoint
    async fn probe(&self, address: &str) -> Result<(), NodeClientError>;

    /// Push an assignment; `Ok` means the node accepted it
    async fn assign_task(
        &self,
        address: &str,
        request: &AssignmentRequest,
    ) -> Result<(), NodeClientError>;

    /// Ask the node to abandon a task. Best effort.
    async fn stop_task(&self, address: &str, task_id: &str) -> Result<(), NodeClientError>;
}

/// `reqwest` implementation speaking the node HTTP API
pub struct HttpNodeClient {
    client: reqwest::Client,
    probe_timeout: Duration,
    assign_timeout: Duration,
    health_path: String,
}

impl HttpNodeClient {
    pub fn new(config: &NodeClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            probe_timeout: Duration::from_secs(config.probe_timeout_seconds),
            assign_timeout: Duration::from_secs(config.assign_timeout_seconds),
            health_path: config.health_path.clone(),
        }
    }

    pub fn with_timeouts(probe_timeout: Duration, assign_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            probe_timeout,
            assign_timeout,
            health_path: "/health".to_string(),
        }
    }

    /// Accepts `host:port` or a full base url
    fn endpoint(address: &str, path: &str) -> String {
        let base = address.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{base}/{path}")
        } else {
            format!("http://{base}/{path}")
        }
    }

    fn map_error(url: &str, timeout: Duration, error: reqwest::Error) -> NodeClientError {
        if error.is_timeout() {
            NodeClientError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            NodeClientError::Transport {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn probe(&self, address: &str) -> Result<(), NodeClientError> {
        let url = Self::endpoint(address, &self.health_path);
        let response = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(&url, self.probe_timeout, e))?;

        let status = response.status();
        debug!(url = %url, status = status.as_u16(), "Probe response");
        if status.is_success() {
            Ok(())
        } else {
            Err(NodeClientError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            })
        }
    }

    async fn assign_task(
        &self,
        address: &str,
        request: &AssignmentRequest,
    ) -> Result<(), NodeClientError> {
        let url = Self::endpoint(address, &format!("api/tasks/{}/assign", request.task_id));
        let response = self
            .client
            .post(&url)
            .timeout(self.assign_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::map_error(&url, self.assign_timeout, e))?;

        match response.status() {
            reqwest::StatusCode::OK | reqwest::StatusCode::ACCEPTED => Ok(()),
            reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                Err(NodeClientError::Rejected(RejectionReason::AtCapacity))
            }
            reqwest::StatusCode::CONFLICT => Err(NodeClientError::Rejected(RejectionReason::Duplicate)),
            other => Err(NodeClientError::UnexpectedStatus {
                url,
                status: other.as_u16(),
            }),
        }
    }

    async fn stop_task(&self, address: &str, task_id: &str) -> Result<(), NodeClientError> {
        let url = Self::endpoint(address, &format!("api/tasks/{task_id}/stop"));
        let response = self
            .client
            .post(&url)
            .timeout(self.assign_timeout)
            .send()
            .await
            .map_err(|e| Self::map_error(&url, self.assign_timeout, e))?;

        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(NodeClientError::UnexpectedStatus {
                url,
                status: response.status().as_u16(),
            })
        }
    }
}
