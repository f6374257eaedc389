use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Coordinator operation counters
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    pub submissions: AtomicU64,
    pub assignments: AtomicU64,
    pub assignment_rejections: AtomicU64,
    pub communication_failures: AtomicU64,
    pub reassignments: AtomicU64,
    pub retries: AtomicU64,
    pub nodes_demoted: AtomicU64,
    pub persistence_failures: AtomicU64,
}

impl CoordinatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_assignment(&self) {
        self.assignments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.assignment_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_communication_failure(&self) {
        self.communication_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reassignments(&self, count: usize) {
        self.reassignments.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion(&self) {
        self.nodes_demoted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Snapshot write failed, in-memory state remains authoritative");
    }

    pub fn get_stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            submissions: self.submissions.load(Ordering::Relaxed),
            assignments: self.assignments.load(Ordering::Relaxed),
            assignment_rejections: self.assignment_rejections.load(Ordering::Relaxed),
            communication_failures: self.communication_failures.load(Ordering::Relaxed),
            reassignments: self.reassignments.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            nodes_demoted: self.nodes_demoted.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Coordinator metrics: submissions={}, assignments={}, rejections={}, comm_failures={}, reassignments={}, retries={}, demotions={}, persistence_failures={}",
            stats.submissions,
            stats.assignments,
            stats.assignment_rejections,
            stats.communication_failures,
            stats.reassignments,
            stats.retries,
            stats.nodes_demoted,
            stats.persistence_failures
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub submissions: u64,
    pub assignments: u64,
    pub assignment_rejections: u64,
    pub communication_failures: u64,
    pub reassignments: u64,
    pub retries: u64,
    pub nodes_demoted: u64,
    pub persistence_failures: u64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
