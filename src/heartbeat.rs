//! Node liveness monitor
//!
//! Each cycle looks for Online nodes whose heartbeat is older than the
//! timeout or whose health probe fails, demotes them to Offline, requeues the
//! work they held and finally re-offers every Pending task once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::HeartbeatConfig;
use crate::coordinator::ClusterCoordinator;
use crate::observability::OperationTimer;
use crate::scheduler::ScheduleAttempt;
use crate::types::{AgentNode, NodeStatus};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    /// Nodes marked Offline this cycle, sorted by id
    pub demoted: Vec<String>,
    /// Tasks freed from demoted nodes
    pub requeued: Vec<String>,
    pub reassigned: Vec<ScheduleAttempt>,
    /// Pending sweep, after reassignment
    pub swept: Vec<ScheduleAttempt>,
}

impl CycleReport {
    pub fn assigned_count(&self) -> usize {
        self.reassigned
            .iter()
            .chain(self.swept.iter())
            .filter(|a| a.outcome.is_assigned())
            .count()
    }
}

pub fn is_stale(node: &AgentNode, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
    now.signed_duration_since(node.last_heartbeat) > timeout
}

/// A node that looked dead, with the heartbeat we observed when deciding
struct Suspect {
    node_id: String,
    observed_heartbeat: DateTime<Utc>,
    reason: String,
}

pub struct HeartbeatMonitor {
    coordinator: ClusterCoordinator,
    check_interval: Duration,
    timeout: chrono::Duration,
    probe_on_sweep: bool,
}

impl HeartbeatMonitor {
    pub fn new(coordinator: ClusterCoordinator, config: &HeartbeatConfig) -> Self {
        Self {
            coordinator,
            check_interval: config.interval(),
            timeout: config.timeout(),
            probe_on_sweep: config.probe_on_sweep,
        }
    }

    pub fn with_settings(
        coordinator: ClusterCoordinator,
        check_interval: Duration,
        timeout: chrono::Duration,
        probe_on_sweep: bool,
    ) -> Self {
        Self {
            coordinator,
            check_interval,
            timeout,
            probe_on_sweep,
        }
    }

    /// Run cycles in the background until `shutdown` flips to true or its
    /// sender is dropped
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.monitor_loop(shutdown).await;
        })
    }

    async fn monitor_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.check_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            check_interval_secs = self.check_interval.as_secs(),
            timeout_secs = self.timeout.num_seconds(),
            probe_on_sweep = self.probe_on_sweep,
            "Heartbeat monitor started"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let report = self.run_cycle().await;
                    if !report.demoted.is_empty() || report.assigned_count() > 0 {
                        info!(
                            demoted = ?report.demoted,
                            requeued = report.requeued.len(),
                            assigned = report.assigned_count(),
                            "Heartbeat cycle finished"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Heartbeat monitor stopped");
    }

    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// One monitor cycle evaluated against the given clock
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let timer = OperationTimer::new("heartbeat_cycle");

        let online: Vec<AgentNode> = {
            let state = self.coordinator.state().read().await;
            state
                .nodes()
                .list()
                .filter(|n| n.status == NodeStatus::Online)
                .cloned()
                .collect()
        };

        let suspects = self.find_suspects(online, now).await;
        let (demoted, requeued) = self.demote(suspects).await;

        let reassigned = if requeued.is_empty() {
            Vec::new()
        } else {
            self.coordinator.metrics().record_reassignments(requeued.len());
            self.coordinator.scheduler().schedule_all(&requeued).await
        };
        let swept = self.coordinator.scheduler().schedule_pending().await;

        timer.finish();
        CycleReport {
            demoted,
            requeued,
            reassigned,
            swept,
        }
    }

    async fn find_suspects(&self, online: Vec<AgentNode>, now: DateTime<Utc>) -> Vec<Suspect> {
        let mut suspects = Vec::new();
        let mut probes = JoinSet::new();

        for node in online {
            if is_stale(&node, now, self.timeout) {
                let silent_for = now.signed_duration_since(node.last_heartbeat).num_seconds();
                warn!(node_id = %node.node_id, silent_for_secs = silent_for, "Node heartbeat timed out");
                suspects.push(Suspect {
                    node_id: node.node_id,
                    observed_heartbeat: node.last_heartbeat,
                    reason: format!("no heartbeat for {silent_for}s"),
                });
            } else if self.probe_on_sweep {
                let client = self.coordinator.client().clone();
                probes.spawn(async move {
                    let result = client.probe(&node.address).await;
                    (node, result)
                });
            }
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((node, Err(e))) => {
                    warn!(node_id = %node.node_id, error = %e, "Node failed liveness probe");
                    suspects.push(Suspect {
                        node_id: node.node_id,
                        observed_heartbeat: node.last_heartbeat,
                        reason: format!("probe failed: {e}"),
                    });
                }
                Ok((node, Ok(()))) => debug!(node_id = %node.node_id, "Probe ok"),
                Err(e) => error!(error = %e, "Probe task panicked"),
            }
        }

        suspects
    }

    /// Demote suspects that are still Online and have not renewed since they
    /// were observed
    async fn demote(&self, suspects: Vec<Suspect>) -> (Vec<String>, Vec<String>) {
        if suspects.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let mut demoted = Vec::new();
        let mut requeued = Vec::new();
        {
            let mut state = self.coordinator.state().write().await;
            for suspect in suspects {
                let unchanged = state.nodes().get(&suspect.node_id).is_ok_and(|node| {
                    node.status == NodeStatus::Online
                        && node.last_heartbeat == suspect.observed_heartbeat
                });
                if !unchanged {
                    debug!(node_id = %suspect.node_id, "Node recovered before demotion");
                    continue;
                }
                match state.demote_node(&suspect.node_id, NodeStatus::Offline) {
                    Ok(freed) => {
                        warn!(
                            node_id = %suspect.node_id,
                            reason = %suspect.reason,
                            freed = freed.len(),
                            "Node marked offline"
                        );
                        demoted.push(suspect.node_id);
                        requeued.extend(freed);
                    }
                    Err(e) => error!(node_id = %suspect.node_id, error = %e, "Demotion failed"),
                }
            }
        }

        for _ in &demoted {
            self.coordinator.metrics().record_demotion();
        }
        if !demoted.is_empty() {
            self.coordinator.persister().persist(self.coordinator.state()).await;
        }
        demoted.sort();
        (demoted, requeued)
    }
}
