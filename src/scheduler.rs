//! Task placement
//!
//! [`Scheduler::schedule`] is the only path that moves a task from Pending to
//! Assigned. It claims the task id for the duration of the attempt so a
//! submission-triggered attempt and a heartbeat sweep can never push the same
//! task twice. The node is contacted with no lock held; the commit
//! re-validates under the write lock and an assignment that can no longer be
//! committed is withdrawn from the node.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, RejectionReason};
use crate::node_client::{AssignmentRequest, NodeClient, NodeClientError};
use crate::observability::{CoordinatorMetrics, OperationTimer};
use crate::persistence::Persister;
use crate::registry::SharedState;
use crate::types::{AgentNode, Task, TaskStatus};

pub const SPECIALTY_WEIGHT: f64 = 0.7;
pub const LOAD_WEIGHT: f64 = 0.3;
/// Overlap ratio used when a task declares no requirements
pub const BASELINE_OVERLAP: f64 = 0.5;

pub fn specialty_overlap(requirements: &BTreeSet<String>, specialties: &BTreeSet<String>) -> f64 {
    if requirements.is_empty() {
        return BASELINE_OVERLAP;
    }
    let matching = requirements.intersection(specialties).count();
    matching as f64 / requirements.len() as f64
}

pub fn score_node(task: &Task, node: &AgentNode) -> f64 {
    SPECIALTY_WEIGHT * specialty_overlap(&task.requirements, &node.specialties)
        + LOAD_WEIGHT * (1.0 - node.load_ratio())
}

/// Candidates best first: highest score, then the lower current load, then
/// the lexicographically smallest node id
pub fn rank_nodes<'a>(task: &Task, candidates: &[&'a AgentNode]) -> Vec<&'a AgentNode> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| {
        score_node(task, b)
            .total_cmp(&score_node(task, a))
            .then_with(|| a.load().cmp(&b.load()))
            .then_with(|| a.node_id.cmp(&b.node_id))
    });
    ranked
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Assigned { node_id: String },
    /// No Online node with spare capacity; the task stays Pending
    NoCandidate,
    Rejected { node_id: String, reason: RejectionReason },
    CommunicationFailed { node_id: String, message: String },
    /// The task is missing or no longer Pending
    NotPending,
    /// Another attempt for this task is running
    InFlight,
    /// The node accepted but the state changed before the commit
    Superseded { node_id: String },
}

impl ScheduleOutcome {
    pub fn is_assigned(&self) -> bool {
        matches!(self, ScheduleOutcome::Assigned { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleAttempt {
    pub task_id: String,
    #[serde(flatten)]
    pub outcome: ScheduleOutcome,
}

/// Holds a task id in the in-flight set until dropped
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    task_id: String,
}

impl InFlightGuard {
    fn claim(in_flight: &Arc<Mutex<HashSet<String>>>, task_id: &str) -> Option<Self> {
        let mut claimed = in_flight.lock().ok()?;
        if !claimed.insert(task_id.to_string()) {
            return None;
        }
        Some(Self {
            in_flight: Arc::clone(in_flight),
            task_id: task_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut claimed) = self.in_flight.lock() {
            claimed.remove(&self.task_id);
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    state: SharedState,
    client: Arc<dyn NodeClient>,
    persister: Persister,
    metrics: Arc<CoordinatorMetrics>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Scheduler {
    pub fn new(
        state: SharedState,
        client: Arc<dyn NodeClient>,
        persister: Persister,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            state,
            client,
            persister,
            metrics,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// One placement attempt for a Pending task. Candidates are offered the
    /// task best first; a node that rejects it or cannot be reached hands the
    /// attempt to the next one.
    pub async fn schedule(&self, task_id: &str) -> ScheduleOutcome {
        let Some(_claim) = InFlightGuard::claim(&self.in_flight, task_id) else {
            debug!(task_id = %task_id, "Scheduling already in flight");
            return ScheduleOutcome::InFlight;
        };

        let (task, ranked) = {
            let state = self.state.read().await;
            let task = match state.tasks().get(task_id) {
                Ok(task) if task.status == TaskStatus::Pending => task.clone(),
                _ => return ScheduleOutcome::NotPending,
            };
            let candidates = state.nodes().list_available();
            let ranked: Vec<AgentNode> = rank_nodes(&task, &candidates)
                .into_iter()
                .cloned()
                .collect();
            (task, ranked)
        };

        if ranked.is_empty() {
            debug!(task_id = %task_id, "No available node, task stays pending");
            return ScheduleOutcome::NoCandidate;
        }

        let request = AssignmentRequest::from(&task);
        let mut last_failure = ScheduleOutcome::NoCandidate;
        let mut accepted_by = None;
        for node in ranked {
            debug!(
                task_id = %task_id,
                node_id = %node.node_id,
                score = score_node(&task, &node),
                "Pushing assignment"
            );

            match self.client.assign_task(&node.address, &request).await {
                Ok(()) => {
                    accepted_by = Some(node);
                    break;
                }
                Err(e) => {
                    last_failure = self.push_failed(task_id, &node.node_id, e);
                }
            }
        }
        let Some(node) = accepted_by else {
            return last_failure;
        };

        let committed = {
            let mut state = self.state.write().await;
            state.commit_assignment(task_id, &node.node_id, Utc::now())
        };

        match committed {
            Ok(()) => {
                self.metrics.record_assignment();
                info!(task_id = %task_id, node_id = %node.node_id, "Task assigned");
                self.persister.persist(&self.state).await;
                ScheduleOutcome::Assigned {
                    node_id: node.node_id,
                }
            }
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    node_id = %node.node_id,
                    error = %e,
                    "Assignment accepted by node but could not be committed, withdrawing"
                );
                if let Err(stop_err) = self.client.stop_task(&node.address, task_id).await {
                    warn!(task_id = %task_id, node_id = %node.node_id, error = %stop_err, "Withdraw failed");
                }
                ScheduleOutcome::Superseded {
                    node_id: node.node_id,
                }
            }
        }
    }

    fn push_failed(&self, task_id: &str, node_id: &str, error: NodeClientError) -> ScheduleOutcome {
        match error.into_coordinator_error(node_id, task_id) {
            CoordinatorError::AssignmentRejected { reason, .. } => {
                self.metrics.record_rejection();
                warn!(task_id = %task_id, node_id = %node_id, reason = %reason, "Node rejected assignment");
                ScheduleOutcome::Rejected {
                    node_id: node_id.to_string(),
                    reason,
                }
            }
            other => {
                self.metrics.record_communication_failure();
                warn!(task_id = %task_id, node_id = %node_id, error = %other, "Assignment push failed");
                ScheduleOutcome::CommunicationFailed {
                    node_id: node_id.to_string(),
                    message: other.to_string(),
                }
            }
        }
    }

    /// Offer each task once, in the given order
    pub async fn schedule_all(&self, task_ids: &[String]) -> Vec<ScheduleAttempt> {
        let mut attempts = Vec::with_capacity(task_ids.len());
        for task_id in task_ids {
            let outcome = self.schedule(task_id).await;
            attempts.push(ScheduleAttempt {
                task_id: task_id.clone(),
                outcome,
            });
        }
        attempts
    }

    /// Offer every Pending task once, highest priority and oldest first
    pub async fn schedule_pending(&self) -> Vec<ScheduleAttempt> {
        let timer = OperationTimer::new("schedule_pending");
        let pending: Vec<String> = {
            let state = self.state.read().await;
            state
                .tasks()
                .pending_in_order()
                .into_iter()
                .map(|t| t.task_id.clone())
                .collect()
        };
        let attempts = self.schedule_all(&pending).await;
        timer.finish();
        attempts
    }
}
