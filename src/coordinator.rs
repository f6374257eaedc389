//! Boundary operations of the cluster coordinator
//!
//! [`ClusterCoordinator`] is the explicit handle passed to HTTP handlers and
//! to the heartbeat monitor. Every operation follows the same shape: any
//! network call to a node happens before or after the state lock is held,
//! the mutation itself is one short critical section, and the new state is
//! written through before follow-up scheduling runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn, Instrument};

use crate::config::CoordinatorConfig;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::node_client::NodeClient;
use crate::observability::{CoordinatorMetrics, CoordinatorStats};
use crate::persistence::{Persister, PersistenceError, SnapshotStore, SnapshotWriter};
use crate::registry::{
    ClusterState, HeartbeatOutcome, RegisterOutcome, SharedState, TransitionOutcome,
};
use crate::scheduler::{ScheduleAttempt, ScheduleOutcome, Scheduler};
use crate::telemetry::{create_coordination_span, generate_correlation_id};
use crate::types::{AgentNode, NodeRegistration, NodeStatus, Task, TaskPriority, TaskStatus};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub default_max_retries: u32,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
        }
    }
}

impl From<&CoordinatorConfig> for CoordinatorOptions {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            default_max_retries: config.tasks.default_max_retries,
        }
    }
}

/// A task as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub task_id: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub requirements: BTreeSet<String>,
    /// Falls back to the configured default
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskSubmission {
    pub fn new(task_id: impl Into<String>, priority: TaskPriority, requirements: &[&str]) -> Self {
        Self {
            task_id: task_id.into(),
            priority,
            requirements: requirements.iter().map(|r| r.to_string()).collect(),
            max_retries: None,
        }
    }
}

/// What a node sends on heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    #[serde(default)]
    pub current_tasks: Vec<String>,
    #[serde(default = "default_reported_status")]
    pub status: NodeStatus,
    /// Node clock; the coordinator clock is used when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_reported_status() -> NodeStatus {
    NodeStatus::Online
}

/// A status callback from a node (or an operator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: TaskStatus,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submitted {
    pub task: Task,
    pub schedule: ScheduleOutcome,
}

/// Tasks returned to Pending and what happened when they were re-offered
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Requeued {
    pub node_id: String,
    pub requeued: Vec<String>,
    pub attempts: Vec<ScheduleAttempt>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub maintenance: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: usize,
    pub pending: usize,
    pub assigned: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub nodes: NodeCounts,
    pub tasks: TaskCounts,
}

impl ClusterSummary {
    pub fn from_state(state: &ClusterState) -> Self {
        let nodes = state.nodes();
        let count_nodes =
            |status: NodeStatus| nodes.list().filter(|n| n.status == status).count();
        let tasks = state.tasks();

        Self {
            nodes: NodeCounts {
                total: nodes.len(),
                online: count_nodes(NodeStatus::Online),
                offline: count_nodes(NodeStatus::Offline),
                maintenance: count_nodes(NodeStatus::Maintenance),
            },
            tasks: TaskCounts {
                total: tasks.len(),
                pending: tasks.count_by_status(TaskStatus::Pending),
                assigned: tasks.count_by_status(TaskStatus::Assigned),
                in_progress: tasks.count_by_status(TaskStatus::InProgress),
                completed: tasks.count_by_status(TaskStatus::Completed),
                failed: tasks.count_by_status(TaskStatus::Failed),
                cancelled: tasks.count_by_status(TaskStatus::Cancelled),
            },
        }
    }
}

/// Full observability snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub revision: u64,
    pub summary: ClusterSummary,
    pub nodes: Vec<AgentNode>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending_tasks: usize,
    pub active_tasks: usize,
    pub completed_tasks: usize,
    /// Online nodes with a free slot
    pub available_nodes: usize,
    /// Sum of capacity over Online nodes
    pub total_capacity: usize,
    /// Tasks held by Online nodes
    pub current_load: usize,
}

/// How startup state was obtained
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestoreReport {
    Fresh,
    Restored {
        revision: u64,
        nodes: usize,
        tasks: usize,
        repairs: Vec<String>,
    },
    Discarded {
        reason: String,
    },
}

#[derive(Clone)]
pub struct ClusterCoordinator {
    state: SharedState,
    client: Arc<dyn NodeClient>,
    scheduler: Scheduler,
    persister: Persister,
    metrics: Arc<CoordinatorMetrics>,
    options: CoordinatorOptions,
}

impl ClusterCoordinator {
    pub fn new(
        client: Arc<dyn NodeClient>,
        store: Arc<dyn SnapshotStore>,
        options: CoordinatorOptions,
    ) -> Self {
        let state = SharedState::default();
        let metrics = Arc::new(CoordinatorMetrics::new());
        let persister = Persister::new(Arc::new(SnapshotWriter::new(store)), metrics.clone());
        let scheduler = Scheduler::new(
            state.clone(),
            client.clone(),
            persister.clone(),
            metrics.clone(),
        );

        Self {
            state,
            client,
            scheduler,
            persister,
            metrics,
            options,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn client(&self) -> &Arc<dyn NodeClient> {
        &self.client
    }

    pub fn persister(&self) -> &Persister {
        &self.persister
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    /// Load the last snapshot. A missing, unreadable or corrupt snapshot
    /// never fails startup; the coordinator starts empty instead.
    pub async fn restore(&self) -> RestoreReport {
        let snapshot = match self.persister.writer().load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!("No snapshot to restore, starting with empty registries");
                return RestoreReport::Fresh;
            }
            Err(e) => {
                error!(error = %e, "Snapshot unreadable, starting with empty registries");
                return RestoreReport::Discarded {
                    reason: e.to_string(),
                };
            }
        };

        let loaded_revision = snapshot.revision;
        let (restored, repairs) = ClusterState::from_snapshot(snapshot);
        for repair in &repairs {
            warn!(repair = %repair, "Repaired restored state");
        }

        let report = RestoreReport::Restored {
            revision: restored.revision(),
            nodes: restored.nodes().len(),
            tasks: restored.tasks().len(),
            repairs: repairs.clone(),
        };
        *self.state.write().await = restored;
        self.persister.writer().mark_restored(loaded_revision).await;

        if !repairs.is_empty() {
            self.persister.persist(&self.state).await;
        }
        info!(revision = loaded_revision, repairs = repairs.len(), "Cluster state restored");
        report
    }

    /// Write the current state, surfacing the error. Used on shutdown.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        let snapshot = self.state.read().await.snapshot();
        self.persister.writer().write(&snapshot).await.map(|_| ())
    }

    pub async fn register_node(&self, registration: NodeRegistration) -> CoordinatorResult<RegisterOutcome> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            "register_node",
            Some(&registration.node_id),
            None,
            Some(&correlation_id),
        );

        async move {
            crate::registry::NodeRegistry::validate(&registration)?;

            if let Err(e) = self.client.probe(&registration.address).await {
                warn!(
                    node_id = %registration.node_id,
                    address = %registration.address,
                    error = %e,
                    "Liveness probe failed, rejecting registration"
                );
                return Err(CoordinatorError::Registration {
                    node_id: registration.node_id,
                    reason: format!("liveness probe failed: {e}"),
                });
            }

            let outcome = {
                let mut state = self.state.write().await;
                state.register_node(registration, Utc::now())?
            };
            self.persister.persist(&self.state).await;
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Remove a node after returning its tasks to Pending, then re-offer them
    pub async fn unregister_node(&self, node_id: &str) -> CoordinatorResult<Requeued> {
        let span = create_coordination_span("unregister_node", Some(node_id), None, None);

        async move {
            let (_, freed) = {
                let mut state = self.state.write().await;
                state.remove_node(node_id)?
            };
            self.persister.persist(&self.state).await;
            Ok(self.reoffer(node_id, freed).await)
        }
        .instrument(span)
        .await
    }

    pub async fn heartbeat(&self, node_id: &str, report: HeartbeatReport) -> CoordinatorResult<HeartbeatOutcome> {
        let span = create_coordination_span("heartbeat", Some(node_id), None, None);

        async move {
            let now = Utc::now();
            let outcome = {
                let mut state = self.state.write().await;
                state.apply_heartbeat(
                    node_id,
                    &report.current_tasks,
                    report.status,
                    report.timestamp.unwrap_or(now),
                    now,
                )?
            };
            self.persister.persist(&self.state).await;

            if !outcome.requeued.is_empty() {
                self.reoffer(node_id, outcome.requeued.clone()).await;
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Record a new task and make one placement attempt. A failed placement
    /// is not an error; the task waits for the next sweep.
    pub async fn submit_task(&self, submission: TaskSubmission) -> CoordinatorResult<Submitted> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span(
            "submit_task",
            None,
            Some(&submission.task_id),
            Some(&correlation_id),
        );

        async move {
            if submission.task_id.trim().is_empty() {
                return Err(CoordinatorError::InvalidRequest(
                    "task_id must not be empty".to_string(),
                ));
            }

            let max_retries = submission
                .max_retries
                .unwrap_or(self.options.default_max_retries);
            {
                let mut state = self.state.write().await;
                state.submit_task(
                    &submission.task_id,
                    submission.priority,
                    submission.requirements,
                    max_retries,
                    Utc::now(),
                )?;
            }
            self.metrics.record_submission();
            self.persister.persist(&self.state).await;
            info!(task_id = %submission.task_id, priority = %submission.priority, "Task submitted");

            let schedule = self.scheduler.schedule(&submission.task_id).await;
            let task = self.get_task(&submission.task_id).await?;
            Ok(Submitted { task, schedule })
        }
        .instrument(span)
        .await
    }

    /// Apply a node's status callback; a failure with retries left is
    /// requeued and re-offered at once
    pub async fn update_task_status(
        &self,
        task_id: &str,
        report: StatusReport,
    ) -> CoordinatorResult<TransitionOutcome> {
        let span = create_coordination_span(
            "update_task_status",
            report.node_id.as_deref(),
            Some(task_id),
            None,
        );

        async move {
            let outcome = {
                let mut state = self.state.write().await;
                state.apply_task_status(
                    task_id,
                    report.status,
                    report.node_id.as_deref(),
                    report.error,
                    Utc::now(),
                )?
            };
            self.persister.persist(&self.state).await;
            info!(
                task_id = %task_id,
                from = %outcome.previous,
                to = %outcome.status,
                "Task status updated"
            );

            if outcome.retried {
                self.metrics.record_retry();
                self.scheduler.schedule(task_id).await;
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Cancel and release capacity at once; the holding node is asked to
    /// stop afterwards on a best-effort basis
    pub async fn cancel_task(&self, task_id: &str) -> CoordinatorResult<TransitionOutcome> {
        let span = create_coordination_span("cancel_task", None, Some(task_id), None);

        async move {
            let (outcome, address) = {
                let mut state = self.state.write().await;
                let outcome = state.cancel_task(task_id, Utc::now())?;
                let address = outcome
                    .released_from
                    .as_deref()
                    .and_then(|node_id| state.nodes().get(node_id).ok())
                    .map(|node| node.address.clone());
                (outcome, address)
            };
            self.persister.persist(&self.state).await;
            info!(task_id = %task_id, from = %outcome.previous, "Task cancelled");

            if let (Some(node_id), Some(address)) = (outcome.released_from.as_deref(), address) {
                if let Err(e) = self.client.stop_task(&address, task_id).await {
                    warn!(task_id = %task_id, node_id = %node_id, error = %e, "Stop request failed");
                }
            }
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Operator drain: no new work, held tasks go back to the queue
    pub async fn set_node_maintenance(&self, node_id: &str) -> CoordinatorResult<Requeued> {
        let freed = {
            let mut state = self.state.write().await;
            state.demote_node(node_id, NodeStatus::Maintenance)?
        };
        self.persister.persist(&self.state).await;
        info!(node_id = %node_id, "Node placed in maintenance");
        Ok(self.reoffer(node_id, freed).await)
    }

    pub async fn set_node_online(&self, node_id: &str) -> CoordinatorResult<AgentNode> {
        let node = {
            let mut state = self.state.write().await;
            state.set_node_online(node_id, Utc::now())?;
            state.nodes().get(node_id)?.clone()
        };
        self.persister.persist(&self.state).await;
        info!(node_id = %node_id, "Node set online by operator");
        Ok(node)
    }

    /// Re-offer freed tasks in the order they were released
    pub(crate) async fn reoffer(&self, node_id: &str, freed: Vec<String>) -> Requeued {
        if !freed.is_empty() {
            self.metrics.record_reassignments(freed.len());
        }
        let attempts = self.scheduler.schedule_all(&freed).await;
        Requeued {
            node_id: node_id.to_string(),
            requeued: freed,
            attempts,
        }
    }

    pub async fn get_task(&self, task_id: &str) -> CoordinatorResult<Task> {
        self.state.read().await.tasks().get(task_id).cloned()
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let state = self.state.read().await;
        state
            .tasks()
            .list()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect()
    }

    pub async fn get_node(&self, node_id: &str) -> CoordinatorResult<AgentNode> {
        self.state.read().await.nodes().get(node_id).cloned()
    }

    pub async fn list_nodes(&self) -> Vec<AgentNode> {
        self.state.read().await.nodes().list().cloned().collect()
    }

    pub async fn get_cluster_status(&self) -> ClusterStatus {
        let state = self.state.read().await;
        ClusterStatus {
            revision: state.revision(),
            summary: ClusterSummary::from_state(&state),
            nodes: state.nodes().list().cloned().collect(),
            tasks: state.tasks().list().cloned().collect(),
        }
    }

    pub async fn get_queue_status(&self) -> QueueStatus {
        let state = self.state.read().await;
        let tasks = state.tasks();
        let online: Vec<&AgentNode> = state
            .nodes()
            .list()
            .filter(|n| n.status == NodeStatus::Online)
            .collect();

        QueueStatus {
            pending_tasks: tasks.count_by_status(TaskStatus::Pending),
            active_tasks: tasks.count_by_status(TaskStatus::Assigned)
                + tasks.count_by_status(TaskStatus::InProgress),
            completed_tasks: tasks.count_by_status(TaskStatus::Completed),
            available_nodes: online.iter().filter(|n| n.has_capacity()).count(),
            total_capacity: online.iter().map(|n| n.max_concurrent_tasks as usize).sum(),
            current_load: online.iter().map(|n| n.load()).sum(),
        }
    }

    pub fn get_metrics(&self) -> CoordinatorStats {
        self.metrics.get_stats()
    }

    pub async fn check_invariants(&self) -> Vec<String> {
        self.state.read().await.check_invariants()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectionReason;
    use crate::node_client::{MockNodeClient, NodeClientError};
    use crate::persistence::{ClusterSnapshot, InMemorySnapshotStore};

    fn registration(node_id: &str, specialties: &[&str], max: u32) -> NodeRegistration {
        NodeRegistration {
            node_id: node_id.to_string(),
            address: format!("{node_id}:8002"),
            specialties: specialties.iter().map(|s| s.to_string()).collect(),
            max_concurrent_tasks: max,
            capabilities: Default::default(),
        }
    }

    fn accepting_client() -> MockNodeClient {
        let mut client = MockNodeClient::new();
        client.expect_probe().returning(|_| Ok(()));
        client.expect_assign_task().returning(|_, _| Ok(()));
        client.expect_stop_task().returning(|_, _| Ok(()));
        client
    }

    fn coordinator(client: MockNodeClient) -> (ClusterCoordinator, Arc<InMemorySnapshotStore>) {
        let store = Arc::new(InMemorySnapshotStore::new());
        (
            ClusterCoordinator::new(Arc::new(client), store.clone(), CoordinatorOptions::default()),
            store,
        )
    }

    #[tokio::test]
    async fn test_registration_requires_successful_probe() {
        let mut client = MockNodeClient::new();
        client.expect_probe().returning(|address| {
            if address.starts_with("good") {
                Ok(())
            } else {
                Err(NodeClientError::Transport {
                    url: address.to_string(),
                    message: "connection refused".to_string(),
                })
            }
        });
        let (coordinator, store) = coordinator(client);

        let outcome = coordinator
            .register_node(registration("good", &[], 2))
            .await
            .unwrap();
        assert_eq!(outcome, RegisterOutcome::Registered);

        let err = coordinator
            .register_node(registration("bad", &[], 2))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Registration { .. }));
        assert!(coordinator.get_node("bad").await.is_err());
        assert_eq!(store.latest().unwrap().nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected_before_probe() {
        let mut client = MockNodeClient::new();
        client.expect_probe().never();
        let (coordinator, _) = coordinator(client);

        let err = coordinator
            .register_node(registration("n1", &[], 0))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Registration { .. }));
    }

    #[tokio::test]
    async fn test_submit_assigns_and_persists() {
        let (coordinator, store) = coordinator(accepting_client());
        coordinator.register_node(registration("n1", &["backend"], 2)).await.unwrap();

        let submitted = coordinator
            .submit_task(TaskSubmission::new("T1", TaskPriority::High, &["backend"]))
            .await
            .unwrap();
        assert_eq!(submitted.schedule, ScheduleOutcome::Assigned { node_id: "n1".to_string() });
        assert_eq!(submitted.task.status, TaskStatus::Assigned);
        assert_eq!(submitted.task.max_retries, 3);

        let latest = store.latest().unwrap();
        assert_eq!(latest.tasks[0].status, TaskStatus::Assigned);
        assert_eq!(coordinator.get_metrics().assignments, 1);
    }

    #[tokio::test]
    async fn test_rejected_submission_stays_pending() {
        let mut client = MockNodeClient::new();
        client.expect_probe().returning(|_| Ok(()));
        client
            .expect_assign_task()
            .returning(|_, _| Err(NodeClientError::Rejected(RejectionReason::Duplicate)));
        let (coordinator, _) = coordinator(client);
        coordinator.register_node(registration("n1", &[], 2)).await.unwrap();

        let submitted = coordinator
            .submit_task(TaskSubmission::new("T1", TaskPriority::Low, &[]))
            .await
            .unwrap();
        assert_eq!(submitted.task.status, TaskStatus::Pending);
        assert!(matches!(submitted.schedule, ScheduleOutcome::Rejected { .. }));
        assert_eq!(coordinator.get_metrics().assignment_rejections, 1);
    }

    #[tokio::test]
    async fn test_empty_task_id_is_invalid() {
        let (coordinator, _) = coordinator(accepting_client());
        let err = coordinator
            .submit_task(TaskSubmission::new("  ", TaskPriority::Low, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_failed_report_is_retried_on_another_attempt() {
        let (coordinator, _) = coordinator(accepting_client());
        coordinator.register_node(registration("n1", &[], 1)).await.unwrap();
        coordinator
            .submit_task(TaskSubmission::new("T1", TaskPriority::Medium, &[]))
            .await
            .unwrap();

        let report = |status| StatusReport {
            status,
            node_id: Some("n1".to_string()),
            error: Some("exit 1".to_string()),
        };
        coordinator.update_task_status("T1", report(TaskStatus::InProgress)).await.unwrap();
        let outcome = coordinator.update_task_status("T1", report(TaskStatus::Failed)).await.unwrap();
        assert!(outcome.retried);

        let task = coordinator.get_task("T1").await.unwrap();
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(coordinator.get_metrics().retries, 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_capacity_and_stops_node() {
        let mut client = MockNodeClient::new();
        client.expect_probe().returning(|_| Ok(()));
        client.expect_assign_task().returning(|_, _| Ok(()));
        client
            .expect_stop_task()
            .withf(|address, task_id| address == "n1:8002" && task_id == "T1")
            .times(1)
            .returning(|_, _| {
                Err(NodeClientError::Timeout {
                    url: "http://n1:8002".to_string(),
                    timeout_ms: 10,
                })
            });
        let (coordinator, _) = coordinator(client);
        coordinator.register_node(registration("n1", &[], 1)).await.unwrap();
        coordinator
            .submit_task(TaskSubmission::new("T1", TaskPriority::Medium, &[]))
            .await
            .unwrap();

        // Stop failure is only logged
        let outcome = coordinator.cancel_task("T1").await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Cancelled);
        assert!(coordinator.get_node("n1").await.unwrap().current_tasks.is_empty());
        assert!(matches!(
            coordinator.cancel_task("nope").await,
            Err(CoordinatorError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_maintenance_moves_work_to_other_node() {
        let (coordinator, _) = coordinator(accepting_client());
        coordinator.register_node(registration("a", &[], 1)).await.unwrap();
        coordinator
            .submit_task(TaskSubmission::new("T1", TaskPriority::Medium, &[]))
            .await
            .unwrap();
        coordinator.register_node(registration("b", &[], 1)).await.unwrap();

        let requeued = coordinator.set_node_maintenance("a").await.unwrap();
        assert_eq!(requeued.requeued, vec!["T1"]);
        assert_eq!(
            requeued.attempts[0].outcome,
            ScheduleOutcome::Assigned { node_id: "b".to_string() }
        );

        let node = coordinator.set_node_online("a").await.unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert!(coordinator.check_invariants().await.is_empty());
    }

    #[tokio::test]
    async fn test_queue_and_cluster_status() {
        let (coordinator, _) = coordinator(accepting_client());
        coordinator.register_node(registration("n1", &[], 2)).await.unwrap();
        coordinator.register_node(registration("n2", &[], 3)).await.unwrap();
        coordinator.set_node_maintenance("n2").await.unwrap();
        for id in ["T1", "T2", "T3"] {
            coordinator
                .submit_task(TaskSubmission::new(id, TaskPriority::Medium, &[]))
                .await
                .unwrap();
        }

        let queue = coordinator.get_queue_status().await;
        assert_eq!(queue.pending_tasks, 1);
        assert_eq!(queue.active_tasks, 2);
        assert_eq!(queue.available_nodes, 0);
        assert_eq!(queue.total_capacity, 2);
        assert_eq!(queue.current_load, 2);

        let status = coordinator.get_cluster_status().await;
        assert_eq!(status.summary.nodes.total, 2);
        assert_eq!(status.summary.nodes.maintenance, 1);
        assert_eq!(status.summary.tasks.assigned, 2);
        assert_eq!(status.tasks.len(), 3);
        assert_eq!(coordinator.list_tasks(Some(TaskStatus::Pending)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_restore_from_corrupt_or_missing_snapshot_starts_empty() {
        struct Broken;

        #[async_trait::async_trait]
        impl SnapshotStore for Broken {
            async fn save(&self, _: &ClusterSnapshot) -> Result<(), PersistenceError> {
                Ok(())
            }
            async fn load(&self) -> Result<Option<ClusterSnapshot>, PersistenceError> {
                Err(PersistenceError::StateCorruption {
                    reason: "truncated".to_string(),
                })
            }
            fn describe(&self) -> String {
                "broken".to_string()
            }
        }

        let coordinator = ClusterCoordinator::new(
            Arc::new(accepting_client()),
            Arc::new(Broken),
            CoordinatorOptions::default(),
        );
        assert!(matches!(coordinator.restore().await, RestoreReport::Discarded { .. }));
        assert!(coordinator.list_nodes().await.is_empty());

        let (fresh, _) = self::coordinator(accepting_client());
        assert_eq!(fresh.restore().await, RestoreReport::Fresh);
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let (original, store) = coordinator(accepting_client());
        original.register_node(registration("n1", &["ml"], 2)).await.unwrap();
        original
            .submit_task(TaskSubmission::new("T1", TaskPriority::Urgent, &["ml"]))
            .await
            .unwrap();

        let snapshot = store.latest().unwrap();
        let restored = ClusterCoordinator::new(
            Arc::new(accepting_client()),
            Arc::new(InMemorySnapshotStore::with_snapshot(snapshot)),
            CoordinatorOptions::default(),
        );
        let report = restored.restore().await;
        assert!(matches!(report, RestoreReport::Restored { nodes: 1, tasks: 1, .. }));
        assert_eq!(
            restored.get_task("T1").await.unwrap(),
            original.get_task("T1").await.unwrap()
        );
        assert_eq!(
            restored.get_node("n1").await.unwrap(),
            original.get_node("n1").await.unwrap()
        );
    }
}
