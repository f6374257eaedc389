//! Durable cluster snapshots
//!
//! The coordinator writes through after every committed mutation. Each
//! snapshot carries the revision of the state it was taken from and
//! [`SnapshotWriter`] refuses to let an older revision overwrite a newer one,
//! so concurrent writers cannot roll the file backwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fd_lock::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::observability::CoordinatorMetrics;
use crate::registry::SharedState;
use crate::types::{AgentNode, Task};

pub const SNAPSHOT_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("State corruption detected: {reason}")]
    StateCorruption { reason: String },

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Lock acquisition failed: {reason}")]
    LockError { reason: String },
}

/// Which process produced a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotOrigin {
    pub hostname: String,
    pub pid: u32,
}

impl SnapshotOrigin {
    pub fn current() -> Self {
        Self {
            hostname: hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            pid: std::process::id(),
        }
    }
}

/// Full node and task tables at one revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub version: String,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
    pub written_by: SnapshotOrigin,
    pub nodes: Vec<AgentNode>,
    pub tasks: Vec<Task>,
}

impl ClusterSnapshot {
    pub fn new(revision: u64, nodes: Vec<AgentNode>, tasks: Vec<Task>) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            revision,
            updated_at: Utc::now(),
            written_by: SnapshotOrigin::current(),
            nodes,
            tasks,
        }
    }
}

/// Storage backend for cluster snapshots
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &ClusterSnapshot) -> Result<(), PersistenceError>;

    /// `Ok(None)` when nothing has been written yet
    async fn load(&self) -> Result<Option<ClusterSnapshot>, PersistenceError>;

    fn describe(&self) -> String;
}

/// JSON file store; writes go to a sibling temp file which is then renamed
/// over the target
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    async fn ensure_parent(&self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &ClusterSnapshot) -> Result<(), PersistenceError> {
        self.ensure_parent().await?;

        let serialized = serde_json::to_string_pretty(snapshot)?;
        let temp_file = self.temp_path();
        fs::write(&temp_file, serialized).await?;
        fs::rename(&temp_file, &self.path).await?;

        debug!(
            revision = snapshot.revision,
            nodes = snapshot.nodes.len(),
            tasks = snapshot.tasks.len(),
            file = ?self.path,
            "Snapshot written"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<ClusterSnapshot>, PersistenceError> {
        if !fs::try_exists(&self.path).await? {
            info!(file = ?self.path, "No existing snapshot found");
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path).await?;
        if contents.trim().is_empty() {
            return Err(PersistenceError::StateCorruption {
                reason: "snapshot file is empty".to_string(),
            });
        }

        let snapshot: ClusterSnapshot = serde_json::from_str(&contents)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: SNAPSHOT_VERSION.to_string(),
                found: snapshot.version,
            });
        }

        info!(
            revision = snapshot.revision,
            nodes = snapshot.nodes.len(),
            tasks = snapshot.tasks.len(),
            written_by = %snapshot.written_by.hostname,
            file = ?self.path,
            "Snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process-local store, used when persistence is disabled and in tests
#[derive(Default)]
pub struct InMemorySnapshotStore {
    latest: std::sync::Mutex<Option<ClusterSnapshot>>,
    saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ClusterSnapshot) -> Self {
        let store = Self::default();
        if let Ok(mut latest) = store.latest.lock() {
            *latest = Some(snapshot);
        }
        store
    }

    pub fn latest(&self) -> Option<ClusterSnapshot> {
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    /// Make subsequent saves fail with an IO error
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::Relaxed);
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &ClusterSnapshot) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(PersistenceError::IoError(std::io::Error::other(
                "in-memory store configured to fail",
            )));
        }
        let mut latest = self.latest.lock().map_err(|_| PersistenceError::LockError {
            reason: "in-memory snapshot mutex poisoned".to_string(),
        })?;
        *latest = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn load(&self) -> Result<Option<ClusterSnapshot>, PersistenceError> {
        Ok(self.latest())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

/// Serializes writes to a store and drops snapshots older than the last one
/// written
pub struct SnapshotWriter {
    store: Arc<dyn SnapshotStore>,
    last_written: Mutex<Option<u64>>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            last_written: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Returns `Ok(false)` when a newer revision has already been written
    pub async fn write(&self, snapshot: &ClusterSnapshot) -> Result<bool, PersistenceError> {
        let mut last_written = self.last_written.lock().await;
        if let Some(last) = *last_written {
            if snapshot.revision <= last {
                debug!(
                    revision = snapshot.revision,
                    last_written = last,
                    "Skipping stale snapshot"
                );
                return Ok(false);
            }
        }

        self.store.save(snapshot).await?;
        *last_written = Some(snapshot.revision);
        Ok(true)
    }

    /// Seed the high-water mark after a restore
    pub async fn mark_restored(&self, revision: u64) {
        *self.last_written.lock().await = Some(revision);
    }

    pub async fn last_written(&self) -> Option<u64> {
        *self.last_written.lock().await
    }

    pub async fn load(&self) -> Result<Option<ClusterSnapshot>, PersistenceError> {
        self.store.load().await
    }
}

/// Write-through of the shared state after a committed mutation.
///
/// The snapshot is cloned under a read lock and written after the lock is
/// released. Failures are logged and counted, never returned.
#[derive(Clone)]
pub struct Persister {
    writer: Arc<SnapshotWriter>,
    metrics: Arc<CoordinatorMetrics>,
}

impl Persister {
    pub fn new(writer: Arc<SnapshotWriter>, metrics: Arc<CoordinatorMetrics>) -> Self {
        Self { writer, metrics }
    }

    pub fn writer(&self) -> &Arc<SnapshotWriter> {
        &self.writer
    }

    /// Returns false when the write failed
    pub async fn persist(&self, state: &SharedState) -> bool {
        let snapshot = state.read().await.snapshot();
        match self.writer.write(&snapshot).await {
            Ok(_) => true,
            Err(e) => {
                error!(
                    revision = snapshot.revision,
                    store = %self.writer.store().describe(),
                    error = %e,
                    "Failed to persist cluster snapshot"
                );
                self.metrics.record_persistence_failure();
                false
            }
        }
    }
}

/// Advisory lock preventing two coordinators from sharing one state file
pub struct InstanceLock {
    path: PathBuf,
    _guard: RwLockWriteGuard<'static, std::fs::File>,
}

impl InstanceLock {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        let lock = Box::leak(Box::new(RwLock::new(lock_file)));
        let guard = lock.try_write().map_err(|_| {
            warn!(file = ?path, "Instance lock is held by another coordinator");
            PersistenceError::LockError {
                reason: format!(
                    "another coordinator already holds {}; only one instance may own a state file",
                    path.display()
                ),
            }
        })?;

        info!(file = ?path, "Instance lock acquired");
        Ok(Self {
            path,
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
