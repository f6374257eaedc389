use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::time::Duration;

use super::{truncate, Command};
use crate::coordinator::ClusterStatus;
use crate::types::{NodeStatus, TaskStatus};

pub struct StatusCommand {
    pub url: String,
}

impl StatusCommand {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn fetch(&self) -> Result<ClusterStatus> {
        let endpoint = format!("{}/api/cluster/status", self.url.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let status = client
            .get(&endpoint)
            .send()
            .await
            .with_context(|| format!("could not reach coordinator at {endpoint}"))?
            .error_for_status()?
            .json::<ClusterStatus>()
            .await?;
        Ok(status)
    }
}

impl Command for StatusCommand {
    async fn execute(&self) -> Result<()> {
        println!("🛰️  CLUSTER COORDINATOR STATUS");
        println!("=============================");
        println!();

        print!("🔄 Contacting {}... ", self.url);
        std::io::Write::flush(&mut std::io::stdout())?;

        match self.fetch().await {
            Ok(status) => {
                println!("✅");
                println!();
                print!("{}", render_status(&status));
                Ok(())
            }
            Err(e) => {
                println!("❌");
                Err(e)
            }
        }
    }
}

pub fn render_status(status: &ClusterStatus) -> String {
    let mut out = String::new();
    let summary = &status.summary;

    let _ = writeln!(out, "📊 NODES ({} total):", summary.nodes.total);
    let _ = writeln!(out, "────────────────────");
    for node in &status.nodes {
        let icon = match node.status {
            NodeStatus::Online if node.has_capacity() => "🟢",
            NodeStatus::Online | NodeStatus::Busy => "🟡",
            NodeStatus::Maintenance => "🔧",
            NodeStatus::Offline => "🔴",
        };
        let _ = writeln!(
            out,
            "{} {:<20} {:<12} {}/{}",
            icon,
            truncate(&node.node_id, 20),
            node.status,
            node.load(),
            node.max_concurrent_tasks
        );
    }
    let _ = writeln!(
        out,
        "   online: {}  offline: {}  maintenance: {}",
        summary.nodes.online, summary.nodes.offline, summary.nodes.maintenance
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "📋 TASKS ({} total):", summary.tasks.total);
    let _ = writeln!(out, "────────────────────");
    let counts = [
        (TaskStatus::Pending, summary.tasks.pending),
        (TaskStatus::Assigned, summary.tasks.assigned),
        (TaskStatus::InProgress, summary.tasks.in_progress),
        (TaskStatus::Completed, summary.tasks.completed),
        (TaskStatus::Failed, summary.tasks.failed),
        (TaskStatus::Cancelled, summary.tasks.cancelled),
    ];
    for (status, count) in counts {
        let _ = writeln!(out, "   {:<12} {}", status.as_str(), count);
    }
    let _ = writeln!(out);

    if summary.tasks.pending > 0 && summary.nodes.online == 0 {
        let _ = writeln!(out, "⏳ Work is queued but no node is online");
    } else if summary.tasks.pending > 0 {
        let _ = writeln!(out, "⏳ {} task(s) waiting for capacity", summary.tasks.pending);
    } else {
        let _ = writeln!(out, "🚀 Queue is empty");
    }
    let _ = writeln!(out, "   revision {}", status.revision);
    out
}
