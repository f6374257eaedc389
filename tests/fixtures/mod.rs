// Shared fixtures for coordinator integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use cluster_coordinator::{
    AssignmentRequest, ClusterCoordinator, CoordinatorOptions, InMemorySnapshotStore, NodeClient,
    NodeClientError, NodeRegistration, RejectionReason,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeState {
    down: HashSet<String>,
    rejecting: HashMap<String, RejectionReason>,
    assigned: Vec<(String, String)>,
    stopped: Vec<(String, String)>,
}

/// In-process stand-in for worker nodes, keyed by address
#[derive(Default)]
pub struct FakeNodeClient {
    state: Mutex<FakeState>,
}

impl FakeNodeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Unreachable nodes fail probes and assignment pushes
    pub fn set_down(&self, address: &str, down: bool) {
        let mut state = self.state.lock().unwrap();
        if down {
            state.down.insert(address.to_string());
        } else {
            state.down.remove(address);
        }
    }

    pub fn reject_with(&self, address: &str, reason: Option<RejectionReason>) {
        let mut state = self.state.lock().unwrap();
        match reason {
            Some(reason) => state.rejecting.insert(address.to_string(), reason),
            None => state.rejecting.remove(address),
        };
    }

    /// (address, task_id) pairs the nodes accepted
    pub fn assignments(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().assigned.clone()
    }

    pub fn stops(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().stopped.clone()
    }
}

fn unreachable(address: &str) -> NodeClientError {
    NodeClientError::Transport {
        url: format!("http://{address}"),
        message: "connection refused".to_string(),
    }
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn probe(&self, address: &str) -> Result<(), NodeClientError> {
        if self.state.lock().unwrap().down.contains(address) {
            return Err(unreachable(address));
        }
        Ok(())
    }

    async fn assign_task(
        &self,
        address: &str,
        request: &AssignmentRequest,
    ) -> Result<(), NodeClientError> {
        let mut state = self.state.lock().unwrap();
        if state.down.contains(address) {
            return Err(unreachable(address));
        }
        if let Some(reason) = state.rejecting.get(address) {
            return Err(NodeClientError::Rejected(*reason));
        }
        state
            .assigned
            .push((address.to_string(), request.task_id.clone()));
        Ok(())
    }

    async fn stop_task(&self, address: &str, task_id: &str) -> Result<(), NodeClientError> {
        let mut state = self.state.lock().unwrap();
        if state.down.contains(address) {
            return Err(unreachable(address));
        }
        state
            .stopped
            .push((address.to_string(), task_id.to_string()));
        Ok(())
    }
}

pub fn registration(node_id: &str, specialties: &[&str], max: u32) -> NodeRegistration {
    NodeRegistration {
        node_id: node_id.to_string(),
        address: address_of(node_id),
        specialties: specialties.iter().map(|s| s.to_string()).collect(),
        max_concurrent_tasks: max,
        capabilities: Default::default(),
    }
}

pub fn address_of(node_id: &str) -> String {
    format!("{node_id}.cluster.local:8002")
}

pub struct Harness {
    pub coordinator: ClusterCoordinator,
    pub client: Arc<FakeNodeClient>,
    pub store: Arc<InMemorySnapshotStore>,
}

pub fn harness() -> Harness {
    harness_with(CoordinatorOptions::default())
}

pub fn harness_with(options: CoordinatorOptions) -> Harness {
    let client = FakeNodeClient::new();
    let store = Arc::new(InMemorySnapshotStore::new());
    let coordinator = ClusterCoordinator::new(client.clone(), store.clone(), options);
    Harness {
        coordinator,
        client,
        store,
    }
}
