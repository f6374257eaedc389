// Node registry - authoritative table of worker nodes keyed by node id

use crate::error::{CoordinatorError, CoordinatorResult, RejectionReason};
use crate::types::{AgentNode, NodeRegistration, NodeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

const CLOCK_SKEW_NOTICE_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterOutcome {
    Registered,
    Updated,
}

/// Result of renewing a node's liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatRenewal {
    pub previous_status: NodeStatus,
    pub status: NodeStatus,
}

impl HeartbeatRenewal {
    pub fn promoted(&self) -> bool {
        self.previous_status == NodeStatus::Offline && self.status == NodeStatus::Online
    }
}

#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, AgentNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Basic shape checks, run before the liveness probe
    pub fn validate(registration: &NodeRegistration) -> CoordinatorResult<()> {
        let reject = |reason: &str| CoordinatorError::Registration {
            node_id: registration.node_id.clone(),
            reason: reason.to_string(),
        };

        if registration.node_id.trim().is_empty() {
            return Err(reject("node_id must not be empty"));
        }
        if registration.address.trim().is_empty() {
            return Err(reject("address must not be empty"));
        }
        if registration.max_concurrent_tasks == 0 {
            return Err(reject("max_concurrent_tasks must be at least 1"));
        }
        Ok(())
    }

    /// Insert (or refresh) a node that already passed its liveness probe.
    ///
    /// Re-registering a known id keeps the tasks it currently holds; the new
    /// capacity must still cover them.
    pub fn register(
        &mut self,
        registration: NodeRegistration,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<RegisterOutcome> {
        Self::validate(&registration)?;

        if let Some(existing) = self.nodes.get_mut(&registration.node_id) {
            if existing.load() > registration.max_concurrent_tasks as usize {
                return Err(CoordinatorError::Registration {
                    node_id: registration.node_id,
                    reason: format!(
                        "max_concurrent_tasks {} is below the {} tasks it currently holds",
                        registration.max_concurrent_tasks,
                        existing.load()
                    ),
                });
            }
            existing.address = registration.address;
            existing.specialties = registration.specialties;
            existing.max_concurrent_tasks = registration.max_concurrent_tasks;
            existing.capabilities = registration.capabilities;
            existing.status = NodeStatus::Online;
            existing.last_heartbeat = now;
            info!(node_id = %existing.node_id, "Node re-registered");
            return Ok(RegisterOutcome::Updated);
        }

        let node = AgentNode {
            node_id: registration.node_id.clone(),
            address: registration.address,
            status: NodeStatus::Online,
            specialties: registration.specialties,
            current_tasks: Vec::new(),
            max_concurrent_tasks: registration.max_concurrent_tasks,
            last_heartbeat: now,
            capabilities: registration.capabilities,
        };
        info!(
            node_id = %node.node_id,
            address = %node.address,
            specialties = ?node.specialties,
            max_concurrent_tasks = node.max_concurrent_tasks,
            "Node registered"
        );
        self.nodes.insert(registration.node_id, node);
        Ok(RegisterOutcome::Registered)
    }

    /// Restore a node verbatim from a snapshot
    pub fn insert_restored(&mut self, node: AgentNode) {
        self.nodes.insert(node.node_id.clone(), node);
    }

    pub fn remove(&mut self, node_id: &str) -> CoordinatorResult<AgentNode> {
        self.nodes
            .remove(node_id)
            .ok_or_else(|| CoordinatorError::NodeNotFound(node_id.to_string()))
    }

    pub fn get(&self, node_id: &str) -> CoordinatorResult<&AgentNode> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| CoordinatorError::NodeNotFound(node_id.to_string()))
    }

    pub fn get_mut(&mut self, node_id: &str) -> CoordinatorResult<&mut AgentNode> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| CoordinatorError::NodeNotFound(node_id.to_string()))
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes ordered by node id
    pub fn list(&self) -> impl Iterator<Item = &AgentNode> {
        self.nodes.values()
    }

    /// Online nodes with a free slot, ordered by node id.
    /// Requirement matching is left to scoring.
    pub fn list_available(&self) -> Vec<&AgentNode> {
        self.nodes.values().filter(|node| node.is_available()).collect()
    }

    /// Renew liveness on the coordinator clock. The node's own `reported_at`
    /// is only compared for skew. An Offline node is promoted back to Online.
    pub fn renew_heartbeat(
        &mut self,
        node_id: &str,
        reported_status: NodeStatus,
        reported_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<HeartbeatRenewal> {
        let node = self.get_mut(node_id)?;
        let previous_status = node.status;

        if now > node.last_heartbeat {
            node.last_heartbeat = now;
        }

        let skew = now.signed_duration_since(reported_at);
        if skew.num_seconds().abs() > CLOCK_SKEW_NOTICE_SECS {
            debug!(
                node_id = %node_id,
                skew_seconds = skew.num_seconds(),
                "Node clock differs from coordinator clock"
            );
        }

        node.status = match (previous_status, reported_status) {
            (_, NodeStatus::Maintenance) => NodeStatus::Maintenance,
            (_, NodeStatus::Offline) => NodeStatus::Offline,
            (NodeStatus::Offline, _) => NodeStatus::Online,
            (current, _) => current,
        };

        debug!(
            node_id = %node_id,
            previous = %previous_status,
            status = %node.status,
            "Heartbeat renewed"
        );

        Ok(HeartbeatRenewal {
            previous_status,
            status: node.status,
        })
    }

    pub fn set_status(&mut self, node_id: &str, status: NodeStatus) -> CoordinatorResult<NodeStatus> {
        let node = self.get_mut(node_id)?;
        let previous = node.status;
        node.status = status;
        Ok(previous)
    }

    /// Record a task against a node, enforcing the capacity bound
    pub fn attach_task(&mut self, node_id: &str, task_id: &str) -> CoordinatorResult<()> {
        let node = self.get_mut(node_id)?;
        if node.holds(task_id) {
            return Err(CoordinatorError::AssignmentRejected {
                node_id: node_id.to_string(),
                task_id: task_id.to_string(),
                reason: RejectionReason::Duplicate,
            });
        }
        if !node.has_capacity() {
            return Err(CoordinatorError::AssignmentRejected {
                node_id: node_id.to_string(),
                task_id: task_id.to_string(),
                reason: RejectionReason::AtCapacity,
            });
        }
        node.current_tasks.push(task_id.to_string());
        Ok(())
    }

    /// Returns true if the node held the task
    pub fn detach_task(&mut self, node_id: &str, task_id: &str) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) => {
                let before = node.current_tasks.len();
                node.current_tasks.retain(|id| id != task_id);
                before != node.current_tasks.len()
            }
            None => false,
        }
    }

    /// Clear and return the node's task list
    pub fn take_tasks(&mut self, node_id: &str) -> CoordinatorResult<Vec<String>> {
        let node = self.get_mut(node_id)?;
        Ok(std::mem::take(&mut node.current_tasks))
    }
}
