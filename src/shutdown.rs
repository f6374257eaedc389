use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::coordinator::ClusterCoordinator;

const MONITOR_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Graceful shutdown coordinator for the cluster coordinator
pub struct ShutdownCoordinator {
    coordinator: ClusterCoordinator,
    sender: watch::Sender<bool>,
    flush_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(coordinator: ClusterCoordinator) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            coordinator,
            sender,
            flush_timeout: FLUSH_TIMEOUT,
        }
    }

    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    /// Receiver handed to background loops; flips to true on shutdown
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve on SIGINT, or SIGTERM on unix
    pub async fn wait_for_signal() {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = terminate => info!("Received SIGTERM"),
        }
    }

    /// Stop background loops, write the final snapshot and log counters
    pub async fn shutdown_all_services(&self, monitor: Option<JoinHandle<()>>) -> Result<()> {
        info!("Initiating graceful shutdown of all services...");
        self.sender.send_replace(true);

        if let Some(handle) = monitor {
            match timeout(MONITOR_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("Heartbeat monitor stopped"),
                Ok(Err(e)) => warn!("Heartbeat monitor ended abnormally: {}", e),
                Err(_) => warn!("Timeout waiting for heartbeat monitor to stop"),
            }
        }

        timeout(self.flush_timeout, self.coordinator.flush())
            .await
            .map_err(|_| anyhow::anyhow!("Timeout writing final snapshot"))??;
        info!("Final snapshot written");

        self.coordinator.metrics().log_stats();

        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}
