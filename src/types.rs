// Cluster data model - nodes and tasks are stored by id, cross references are ids only

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Opaque node metadata reported at registration (platform, versions, ...)
pub type Capabilities = serde_json::Map<String, serde_json::Value>;

/// Health/availability state of a worker node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Online,
    Offline,
    Busy,
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Busy => "busy",
            NodeStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(NodeStatus::Online),
            "offline" => Ok(NodeStatus::Offline),
            "busy" => Ok(NodeStatus::Busy),
            "maintenance" => Ok(NodeStatus::Maintenance),
            other => Err(format!("unknown node status: {other}")),
        }
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// A node is holding the task
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown task status: {s}"))
    }
}

/// Static task ordering used by the pending sweep.
/// Higher values are offered to the scheduler first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    Urgent = 4,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskPriority::Urgent => "URGENT",
            TaskPriority::High => "HIGH",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::Low => "LOW",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A registered worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNode {
    pub node_id: String,
    /// Endpoint reference, `host:port` or a full `http://` base url
    pub address: String,
    pub status: NodeStatus,
    pub specialties: BTreeSet<String>,
    /// Task ids currently claimed by this node, in assignment order
    pub current_tasks: Vec<String>,
    pub max_concurrent_tasks: u32,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl AgentNode {
    pub fn load(&self) -> usize {
        self.current_tasks.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.load() < self.max_concurrent_tasks as usize
    }

    pub fn load_ratio(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 1.0;
        }
        self.load() as f64 / self.max_concurrent_tasks as f64
    }

    /// Online with at least one free slot
    pub fn is_available(&self) -> bool {
        self.status == NodeStatus::Online && self.has_capacity()
    }

    pub fn holds(&self, task_id: &str) -> bool {
        self.current_tasks.iter().any(|id| id == task_id)
    }
}

/// What a node sends when it registers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub node_id: String,
    pub address: String,
    #[serde(default)]
    pub specialties: BTreeSet<String>,
    pub max_concurrent_tasks: u32,
    #[serde(default)]
    pub capabilities: Capabilities,
}

/// A unit of work tracked from submission to a terminal outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub priority: TaskPriority,
    pub requirements: BTreeSet<String>,
    pub assigned_node: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Last failure reported by a node
    #[serde(default)]
    pub error: Option<String>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        priority: TaskPriority,
        requirements: BTreeSet<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            priority,
            requirements,
            assigned_node: None,
            status: TaskStatus::Pending,
            created_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            error: None,
        }
    }

    pub fn retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
