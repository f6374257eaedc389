//! Authoritative in-memory cluster state
//!
//! [`ClusterState`] owns the node and task tables. Both sides of every
//! node/task cross reference are updated inside a single method call, so a
//! caller holding the state lock never observes a half-applied change.
//! Nothing here performs I/O.

pub mod nodes;
pub mod tasks;

pub use nodes::{HeartbeatRenewal, NodeRegistry, RegisterOutcome};
pub use tasks::{is_allowed_transition, TaskRegistry};

use crate::error::{CoordinatorError, CoordinatorResult, RejectionReason};
use crate::persistence::ClusterSnapshot;
use crate::types::{AgentNode, NodeRegistration, NodeStatus, Task, TaskPriority, TaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The one lock every mutation goes through
pub type SharedState = Arc<RwLock<ClusterState>>;

/// Effect of a status report on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub task_id: String,
    pub previous: TaskStatus,
    pub status: TaskStatus,
    /// A failure report was turned into a retry
    pub retried: bool,
    /// Node that stopped holding the task as a result
    pub released_from: Option<String>,
}

/// Result of applying a heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeartbeatOutcome {
    pub node_id: String,
    pub status: NodeStatus,
    pub promoted: bool,
    /// Tasks the node reported but the coordinator does not attribute to it
    pub unknown_tasks: Vec<String>,
    /// Tasks returned to Pending because the node reported itself unavailable
    pub requeued: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    nodes: NodeRegistry,
    tasks: TaskRegistry,
    revision: u64,
}

impl ClusterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Incremented on every committed mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn bump(&mut self) {
        self.revision += 1;
    }

    pub fn register_node(
        &mut self,
        registration: NodeRegistration,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<RegisterOutcome> {
        let outcome = self.nodes.register(registration, now)?;
        self.bump();
        Ok(outcome)
    }

    /// Requeue everything the node holds, then drop it.
    /// Returns the removed node and the freed task ids.
    pub fn remove_node(&mut self, node_id: &str) -> CoordinatorResult<(AgentNode, Vec<String>)> {
        let freed = self.requeue_node_tasks(node_id)?;
        let node = self.nodes.remove(node_id)?;
        self.bump();
        info!(node_id = %node_id, freed = freed.len(), "Node unregistered");
        Ok((node, freed))
    }

    pub fn submit_task(
        &mut self,
        task_id: &str,
        priority: TaskPriority,
        requirements: BTreeSet<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Task> {
        let task = self
            .tasks
            .insert(task_id, priority, requirements, max_retries, now)?
            .clone();
        self.bump();
        Ok(task)
    }

    /// Pending -> Assigned on an Online node with spare capacity.
    /// Either both tables change or neither does.
    pub fn commit_assignment(
        &mut self,
        task_id: &str,
        node_id: &str,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<()> {
        let task = self.tasks.get(task_id)?;
        if task.status != TaskStatus::Pending {
            return Err(CoordinatorError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Assigned,
            });
        }

        let node = self.nodes.get(node_id)?;
        if node.status != NodeStatus::Online {
            return Err(CoordinatorError::NodeUnavailable {
                node_id: node_id.to_string(),
                status: node.status,
            });
        }
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

        self.nodes.attach_task(node_id, task_id)?;
        self.tasks.mark_assigned(task_id, node_id, now)?;
        self.bump();
        Ok(())
    }

    /// Return every active task held by the node to Pending and clear its
    /// task list. Returns the freed ids in the order the node held them.
    pub fn requeue_node_tasks(&mut self, node_id: &str) -> CoordinatorResult<Vec<String>> {
        let held = self.nodes.take_tasks(node_id)?;

        let mut candidates = held;
        for task in self.tasks.active_on_node(node_id) {
            if !candidates.contains(&task.task_id) {
                candidates.push(task.task_id.clone());
            }
        }

        let mut freed = Vec::new();
        for task_id in candidates {
            let attributed = self
                .tasks
                .get(&task_id)
                .map(|t| t.status.is_active() && t.assigned_node.as_deref() == Some(node_id))
                .unwrap_or(false);
            if attributed {
                self.tasks.requeue(&task_id)?;
                freed.push(task_id);
            }
        }

        self.bump();
        if !freed.is_empty() {
            info!(node_id = %node_id, tasks = ?freed, "Requeued tasks held by node");
        }
        Ok(freed)
    }

    /// Mark a node Offline or Maintenance and requeue its work
    pub fn demote_node(&mut self, node_id: &str, status: NodeStatus) -> CoordinatorResult<Vec<String>> {
        let previous = self.nodes.set_status(node_id, status)?;
        if previous != status {
            warn!(node_id = %node_id, from = %previous, to = %status, "Node demoted");
        }
        self.requeue_node_tasks(node_id)
    }

    /// Operator override back to Online with a fresh heartbeat
    pub fn set_node_online(&mut self, node_id: &str, now: DateTime<Utc>) -> CoordinatorResult<NodeStatus> {
        let node = self.nodes.get_mut(node_id)?;
        let previous = node.status;
        node.status = NodeStatus::Online;
        if now > node.last_heartbeat {
            node.last_heartbeat = now;
        }
        self.bump();
        Ok(previous)
    }

    pub fn apply_heartbeat(
        &mut self,
        node_id: &str,
        reported_tasks: &[String],
        reported_status: NodeStatus,
        reported_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<HeartbeatOutcome> {
        let renewal = self
            .nodes
            .renew_heartbeat(node_id, reported_status, reported_at, now)?;

        let requeued = match renewal.status {
            NodeStatus::Offline | NodeStatus::Maintenance => self.requeue_node_tasks(node_id)?,
            _ => Vec::new(),
        };
        let unknown_tasks = self.reconcile_node_tasks(node_id, reported_tasks)?;
        self.bump();

        if renewal.promoted() {
            info!(node_id = %node_id, "Node back online after heartbeat");
        }
        if !unknown_tasks.is_empty() {
            warn!(node_id = %node_id, unknown = ?unknown_tasks, "Node reported tasks it does not hold");
        }

        Ok(HeartbeatOutcome {
            node_id: node_id.to_string(),
            status: renewal.status,
            promoted: renewal.promoted(),
            unknown_tasks,
            requeued,
        })
    }

    /// Rebuild the node's task list from the task table. Returns the reported
    /// ids the task table does not attribute to this node.
    pub fn reconcile_node_tasks(
        &mut self,
        node_id: &str,
        reported: &[String],
    ) -> CoordinatorResult<Vec<String>> {
        let mut attributed: Vec<(Option<DateTime<Utc>>, String)> = self
            .tasks
            .active_on_node(node_id)
            .into_iter()
            .map(|t| (t.assigned_at, t.task_id.clone()))
            .collect();
        attributed.sort();

        let node = self.nodes.get_mut(node_id)?;
        let mut rebuilt: Vec<String> = node
            .current_tasks
            .iter()
            .filter(|id| attributed.iter().any(|(_, a)| a == *id))
            .cloned()
            .collect();
        for (_, task_id) in &attributed {
            if !rebuilt.contains(task_id) {
                rebuilt.push(task_id.clone());
            }
        }
        node.current_tasks = rebuilt;

        let unknown = reported
            .iter()
            .filter(|id| !node.current_tasks.contains(*id))
            .cloned()
            .collect();
        Ok(unknown)
    }

    /// Apply a status report. `actor`, when given, must be the node holding
    /// the task. A failure with retries left goes back to Pending.
    pub fn apply_task_status(
        &mut self,
        task_id: &str,
        to: TaskStatus,
        actor: Option<&str>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<TransitionOutcome> {
        let task = self.tasks.get(task_id)?;
        let previous = task.status;

        // Assigned is reserved for the scheduler
        if to == TaskStatus::Assigned || !is_allowed_transition(previous, to) {
            return Err(CoordinatorError::InvalidTransition {
                task_id: task_id.to_string(),
                from: previous,
                to,
            });
        }
        if let Some(actor) = actor {
            if task.assigned_node.as_deref() != Some(actor) {
                return Err(CoordinatorError::NotAssignedToNode {
                    task_id: task_id.to_string(),
                    node_id: actor.to_string(),
                });
            }
        }

        let holder = task.assigned_node.clone();
        let mut released_from = None;
        let mut retried = false;

        if to.is_terminal() {
            if let Some(node_id) = holder.as_deref() {
                if self.nodes.detach_task(node_id, task_id) {
                    released_from = Some(node_id.to_string());
                }
            }
        }

        let task = self.tasks.get_mut(task_id)?;
        match to {
            TaskStatus::InProgress => {
                task.status = TaskStatus::InProgress;
                task.started_at.get_or_insert(now);
            }
            TaskStatus::Completed => {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(now);
            }
            TaskStatus::Cancelled => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
            }
            TaskStatus::Failed if task.retries_remaining() => {
                task.retry_count += 1;
                task.status = TaskStatus::Pending;
                task.assigned_node = None;
                task.assigned_at = None;
                task.started_at = None;
                task.error = None;
                retried = true;
                info!(
                    task_id = %task_id,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    reason = ?error,
                    "Task failed, scheduling retry"
                );
            }
            TaskStatus::Failed => {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
                task.error = error;
                warn!(
                    task_id = %task_id,
                    retry_count = task.retry_count,
                    "Task failed permanently, retries exhausted"
                );
            }
            TaskStatus::Pending | TaskStatus::Assigned => {
                return Err(CoordinatorError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: previous,
                    to,
                });
            }
        }
        let status = task.status;
        self.bump();

        Ok(TransitionOutcome {
            task_id: task_id.to_string(),
            previous,
            status,
            retried,
            released_from,
        })
    }

    /// Cancel a non-terminal task. Cancelling an already cancelled task is a
    /// no-op; Completed and Failed tasks cannot be cancelled.
    pub fn cancel_task(&mut self, task_id: &str, now: DateTime<Utc>) -> CoordinatorResult<TransitionOutcome> {
        let task = self.tasks.get(task_id)?;
        if task.status == TaskStatus::Cancelled {
            return Ok(TransitionOutcome {
                task_id: task_id.to_string(),
                previous: TaskStatus::Cancelled,
                status: TaskStatus::Cancelled,
                retried: false,
                released_from: None,
            });
        }
        self.apply_task_status(task_id, TaskStatus::Cancelled, None, None, now)
    }

    /// Describe every invariant violation; empty when consistent
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for node in self.nodes.list() {
            if node.load() > node.max_concurrent_tasks as usize {
                violations.push(format!(
                    "node {} holds {} tasks with capacity {}",
                    node.node_id,
                    node.load(),
                    node.max_concurrent_tasks
                ));
            }
            for task_id in &node.current_tasks {
                match self.tasks.get(task_id) {
                    Ok(task) if task.status.is_active()
                        && task.assigned_node.as_deref() == Some(node.node_id.as_str()) => {}
                    _ => violations.push(format!(
                        "node {} lists task {} which is not active on it",
                        node.node_id, task_id
                    )),
                }
            }
        }

        for task in self.tasks.list() {
            if task.retry_count > task.max_retries {
                violations.push(format!(
                    "task {} retry_count {} exceeds max_retries {}",
                    task.task_id, task.retry_count, task.max_retries
                ));
            }
            if !task.status.is_active() {
                continue;
            }
            let Some(node_id) = task.assigned_node.as_deref() else {
                violations.push(format!("task {} is {} without a node", task.task_id, task.status));
                continue;
            };
            match self.nodes.get(node_id) {
                Ok(node) if node.status == NodeStatus::Online && node.holds(&task.task_id) => {}
                Ok(node) => violations.push(format!(
                    "task {} is {} on node {} which is {} or does not list it",
                    task.task_id, task.status, node_id, node.status
                )),
                Err(_) => violations.push(format!(
                    "task {} is {} on unknown node {}",
                    task.task_id, task.status, node_id
                )),
            }
        }

        violations
    }

    /// Bring restored state back in line with the invariants.
    /// Returns a description of every repair made.
    pub fn repair(&mut self) -> Vec<String> {
        let mut repairs = Vec::new();

        let node_ids: Vec<String> = self.nodes.list().map(|n| n.node_id.clone()).collect();
        for node_id in &node_ids {
            if let Ok(node) = self.nodes.get_mut(node_id) {
                if node.status == NodeStatus::Busy {
                    node.status = NodeStatus::Online;
                    repairs.push(format!("node {node_id} busy status normalised to online"));
                }
            }
        }

        let orphaned: Vec<String> = self
            .tasks
            .list()
            .filter(|t| t.status.is_active())
            .filter(|t| match t.assigned_node.as_deref() {
                Some(node_id) => !matches!(
                    self.nodes.get(node_id),
                    Ok(node) if node.status == NodeStatus::Online
                ),
                None => true,
            })
            .map(|t| t.task_id.clone())
            .collect();
        for task_id in orphaned {
            if self.tasks.requeue(&task_id).is_ok() {
                repairs.push(format!("task {task_id} requeued, its node is gone or not online"));
            }
        }

        for node_id in &node_ids {
            let mut attributed: Vec<(Option<DateTime<Utc>>, String)> = self
                .tasks
                .active_on_node(node_id)
                .into_iter()
                .map(|t| (t.assigned_at, t.task_id.clone()))
                .collect();
            attributed.sort();

            let capacity = self
                .nodes
                .get(node_id)
                .map(|n| n.max_concurrent_tasks as usize)
                .unwrap_or(0);
            let overflow: Vec<String> = attributed
                .iter()
                .skip(capacity)
                .map(|(_, id)| id.clone())
                .collect();
            for task_id in &overflow {
                if self.tasks.requeue(task_id).is_ok() {
                    repairs.push(format!("task {task_id} requeued, node {node_id} over capacity"));
                }
            }

            let before = match self.nodes.get(node_id) {
                Ok(node) => node.current_tasks.clone(),
                Err(_) => continue,
            };
            if self.reconcile_node_tasks(node_id, &[]).is_ok() {
                if let Ok(node) = self.nodes.get(node_id) {
                    if node.current_tasks != before {
                        repairs.push(format!(
                            "node {node_id} task list rebuilt from {:?} to {:?}",
                            before, node.current_tasks
                        ));
                    }
                }
            }
        }

        let over_retried: Vec<String> = self
            .tasks
            .list()
            .filter(|t| t.retry_count > t.max_retries)
            .map(|t| t.task_id.clone())
            .collect();
        for task_id in over_retried {
            if let Ok(task) = self.tasks.get_mut(&task_id) {
                task.retry_count = task.max_retries;
                if !task.status.is_terminal() {
                    task.status = TaskStatus::Failed;
                    task.assigned_node = None;
                }
                repairs.push(format!("task {task_id} retry budget exceeded, marked failed"));
            }
        }

        if !repairs.is_empty() {
            self.bump();
        }
        repairs
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot::new(
            self.revision,
            self.nodes.list().cloned().collect(),
            self.tasks.list().cloned().collect(),
        )
    }

    /// Rebuild state from a snapshot and repair it. Returns the state and the
    /// repairs that were needed.
    pub fn from_snapshot(snapshot: ClusterSnapshot) -> (Self, Vec<String>) {
        let mut state = Self {
            revision: snapshot.revision,
            ..Self::default()
        };
        for node in snapshot.nodes {
            state.nodes.insert_restored(node);
        }
        for task in snapshot.tasks {
            state.tasks.insert_restored(task);
        }
        let repairs = state.repair();
        (state, repairs)
    }
}
