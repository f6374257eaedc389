use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::Command;
use crate::api::create_router;
use crate::config::CoordinatorConfig;
use crate::coordinator::{ClusterCoordinator, CoordinatorOptions, RestoreReport};
use crate::heartbeat::HeartbeatMonitor;
use crate::node_client::{HttpNodeClient, NodeClient};
use crate::persistence::{FileSnapshotStore, InMemorySnapshotStore, InstanceLock, SnapshotStore};
use crate::shutdown::ShutdownCoordinator;

pub struct ServeCommand {
    pub config: CoordinatorConfig,
}

impl ServeCommand {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Apply command-line overrides; a new state file moves the lock file
    /// next to it
    pub fn with_overrides(
        mut self,
        host: Option<String>,
        port: Option<u16>,
        state_file: Option<PathBuf>,
    ) -> Self {
        if let Some(host) = host {
            self.config.server.host = host;
        }
        if let Some(port) = port {
            self.config.server.port = port;
        }
        if let Some(state_file) = state_file {
            self.config.persistence.lock_file = state_file.with_extension("lock");
            self.config.persistence.state_file = state_file;
        }
        self
    }

    /// Take the instance lock (when persisting) and open the snapshot store
    fn open_store(&self) -> Result<(Option<InstanceLock>, Arc<dyn SnapshotStore>)> {
        let persistence = &self.config.persistence;
        if !persistence.enabled {
            info!("Persistence disabled, cluster state lives in memory only");
            let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
            return Ok((None, store));
        }

        let lock = InstanceLock::acquire(&persistence.lock_file)
            .context("refusing to start a second coordinator on the same state file")?;
        let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&persistence.state_file));
        Ok((Some(lock), store))
    }
}

impl Command for ServeCommand {
    async fn execute(&self) -> Result<()> {
        let (_lock, store) = self.open_store()?;
        let client: Arc<dyn NodeClient> = Arc::new(HttpNodeClient::new(&self.config.node_client));
        let coordinator = ClusterCoordinator::new(client, store, CoordinatorOptions::from(&self.config));

        match coordinator.restore().await {
            RestoreReport::Fresh => println!("📭 No snapshot found, starting with an empty cluster"),
            RestoreReport::Restored {
                revision,
                nodes,
                tasks,
                repairs,
            } => {
                println!("📦 Restored revision {revision}: {nodes} node(s), {tasks} task(s)");
                if !repairs.is_empty() {
                    println!("⚠️  {} inconsistency(ies) repaired on load", repairs.len());
                }
            }
            RestoreReport::Discarded { reason } => {
                println!("⚠️  Snapshot discarded ({reason}), starting with an empty cluster")
            }
        }

        let shutdown = ShutdownCoordinator::new(coordinator.clone());
        let monitor = HeartbeatMonitor::new(coordinator.clone(), &self.config.heartbeat)
            .start(shutdown.subscribe());

        let address = self.config.server.bind_address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        println!("🚀 Cluster coordinator listening on {address}");
        info!(address = %address, "HTTP API started");

        axum::serve(listener, create_router(coordinator))
            .with_graceful_shutdown(ShutdownCoordinator::wait_for_signal())
            .await?;

        shutdown.shutdown_all_services(Some(monitor)).await?;
        println!("👋 Coordinator stopped");
        Ok(())
    }
}
