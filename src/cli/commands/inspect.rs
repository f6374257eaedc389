use anyhow::Result;
use std::fmt::Write as _;
use std::path::PathBuf;

use super::{truncate, Command};
use crate::persistence::{ClusterSnapshot, FileSnapshotStore, SnapshotStore};
use crate::registry::ClusterState;

pub struct InspectCommand {
    pub state_file: PathBuf,
}

impl InspectCommand {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }
}

impl Command for InspectCommand {
    async fn execute(&self) -> Result<()> {
        println!("🔍 SNAPSHOT {}", self.state_file.display());
        println!("==========================================");
        println!();

        let store = FileSnapshotStore::new(&self.state_file);
        match store.load().await? {
            Some(snapshot) => print!("{}", render_snapshot(&snapshot)),
            None => println!("📭 No snapshot found; a coordinator would start empty"),
        }
        Ok(())
    }
}

pub fn render_snapshot(snapshot: &ClusterSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "📦 version {}  revision {}  written {} by {} (pid {})",
        snapshot.version,
        snapshot.revision,
        snapshot.updated_at.to_rfc3339(),
        snapshot.written_by.hostname,
        snapshot.written_by.pid
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "🖥️  NODES ({}):", snapshot.nodes.len());
    let _ = writeln!(
        out,
        "   {:<20} {:<12} {:<8} {:<24} LAST HEARTBEAT",
        "NODE", "STATUS", "LOAD", "SPECIALTIES"
    );
    for node in &snapshot.nodes {
        let specialties: Vec<&str> = node.specialties.iter().map(String::as_str).collect();
        let _ = writeln!(
            out,
            "   {:<20} {:<12} {:<8} {:<24} {}",
            truncate(&node.node_id, 20),
            node.status,
            format!("{}/{}", node.load(), node.max_concurrent_tasks),
            truncate(&specialties.join(","), 24),
            node.last_heartbeat.format("%Y-%m-%d %H:%M:%S")
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "📋 TASKS ({}):", snapshot.tasks.len());
    let _ = writeln!(
        out,
        "   {:<20} {:<8} {:<12} {:<20} RETRIES",
        "TASK", "PRIORITY", "STATUS", "NODE"
    );
    for task in &snapshot.tasks {
        let _ = writeln!(
            out,
            "   {:<20} {:<8} {:<12} {:<20} {}/{}",
            truncate(&task.task_id, 20),
            task.priority,
            task.status,
            truncate(task.assigned_node.as_deref().unwrap_or("-"), 20),
            task.retry_count,
            task.max_retries
        );
    }

    let (_, repairs) = ClusterState::from_snapshot(snapshot.clone());
    if !repairs.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "⚠️  REPAIRS APPLIED ON LOAD:");
        for repair in repairs {
            let _ = writeln!(out, "   - {repair}");
        }
    }
    out
}
