// Cluster Coordinator Library - task placement across agent nodes
// This exposes the core components for testing and integration

pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod heartbeat;
pub mod node_client;
pub mod observability;
pub mod persistence;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;
pub mod types;

// Re-export key types for easy access
pub use api::{create_router, AppError};
pub use config::CoordinatorConfig;
pub use coordinator::{
    ClusterCoordinator, ClusterStatus, CoordinatorOptions, HeartbeatReport, QueueStatus,
    RestoreReport, StatusReport, TaskSubmission,
};
pub use error::{CoordinatorError, CoordinatorResult, RejectionReason};
pub use heartbeat::{CycleReport, HeartbeatMonitor};
pub use node_client::{AssignmentRequest, HttpNodeClient, NodeClient, NodeClientError};
pub use observability::{CoordinatorMetrics, CoordinatorStats, OperationTimer};
pub use persistence::{
    ClusterSnapshot, FileSnapshotStore, InMemorySnapshotStore, InstanceLock, PersistenceError,
    SnapshotStore, SnapshotWriter,
};
pub use registry::{ClusterState, SharedState};
pub use scheduler::{ScheduleAttempt, ScheduleOutcome, Scheduler};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use types::{AgentNode, NodeRegistration, NodeStatus, Task, TaskPriority, TaskStatus};
