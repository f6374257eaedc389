// Property-based testing of capacity and cross-reference invariants
// Random operation sequences must never leave the registries inconsistent

mod fixtures;

use cluster_coordinator::{
    NodeStatus, StatusReport, TaskPriority, TaskStatus, TaskSubmission,
};
use fixtures::{address_of, harness, registration};
use futures::future::join_all;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Register { node: u8, capacity: u32 },
    Unregister { node: u8 },
    Submit { task: u8, priority: u8 },
    Report { task: u8, status: TaskStatus },
    Cancel { task: u8 },
    Maintenance { node: u8 },
    Online { node: u8 },
    Heartbeat { node: u8, status: NodeStatus },
    NodeDown { node: u8, down: bool },
    Sweep,
}

fn node_id(n: u8) -> String {
    format!("node-{n}")
}

fn task_id(t: u8) -> String {
    format!("task-{t}")
}

fn priority(p: u8) -> TaskPriority {
    match p % 4 {
        0 => TaskPriority::Low,
        1 => TaskPriority::Medium,
        2 => TaskPriority::High,
        _ => TaskPriority::Urgent,
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let node = 0u8..4;
    let task = 0u8..8;
    prop_oneof![
        (node.clone(), 1u32..=3).prop_map(|(node, capacity)| Op::Register { node, capacity }),
        node.clone().prop_map(|node| Op::Unregister { node }),
        (task.clone(), any::<u8>()).prop_map(|(task, priority)| Op::Submit { task, priority }),
        (
            task.clone(),
            prop_oneof![
                Just(TaskStatus::InProgress),
                Just(TaskStatus::Completed),
                Just(TaskStatus::Failed),
            ]
        )
            .prop_map(|(task, status)| Op::Report { task, status }),
        task.prop_map(|task| Op::Cancel { task }),
        node.clone().prop_map(|node| Op::Maintenance { node }),
        node.clone().prop_map(|node| Op::Online { node }),
        (
            node.clone(),
            prop_oneof![
                Just(NodeStatus::Online),
                Just(NodeStatus::Busy),
                Just(NodeStatus::Maintenance),
            ]
        )
            .prop_map(|(node, status)| Op::Heartbeat { node, status }),
        (node, any::<bool>()).prop_map(|(node, down)| Op::NodeDown { node, down }),
        Just(Op::Sweep),
    ]
}

/// Apply the sequence, returning every invariant violation seen along the way
async fn run_ops(ops: Vec<Op>) -> Vec<String> {
    let h = harness();
    let mut violations = Vec::new();

    for op in ops {
        // Individual operations may legitimately fail; only consistency matters
        match &op {
            Op::Register { node, capacity } => {
                let _ = h
                    .coordinator
                    .register_node(registration(&node_id(*node), &[], *capacity))
                    .await;
            }
            Op::Unregister { node } => {
                let _ = h.coordinator.unregister_node(&node_id(*node)).await;
            }
            Op::Submit { task, priority: p } => {
                let _ = h
                    .coordinator
                    .submit_task(TaskSubmission::new(task_id(*task), priority(*p), &[]))
                    .await;
            }
            Op::Report { task, status } => {
                let _ = h
                    .coordinator
                    .update_task_status(
                        &task_id(*task),
                        StatusReport {
                            status: *status,
                            node_id: None,
                            error: None,
                        },
                    )
                    .await;
            }
            Op::Cancel { task } => {
                let _ = h.coordinator.cancel_task(&task_id(*task)).await;
            }
            Op::Maintenance { node } => {
                let _ = h.coordinator.set_node_maintenance(&node_id(*node)).await;
            }
            Op::Online { node } => {
                let _ = h.coordinator.set_node_online(&node_id(*node)).await;
            }
            Op::Heartbeat { node, status } => {
                let _ = h
                    .coordinator
                    .heartbeat(
                        &node_id(*node),
                        cluster_coordinator::HeartbeatReport {
                            current_tasks: vec![],
                            status: *status,
                            timestamp: None,
                        },
                    )
                    .await;
            }
            Op::NodeDown { node, down } => {
                h.client.set_down(&address_of(&node_id(*node)), *down);
            }
            Op::Sweep => {
                h.coordinator.scheduler().schedule_pending().await;
            }
        }

        for violation in h.coordinator.check_invariants().await {
            violations.push(format!("after {op:?}: {violation}"));
        }
    }

    // Every persisted snapshot must restore to an identical, consistent state
    if let Some(snapshot) = h.store.latest() {
        let (restored, repairs) = cluster_coordinator::ClusterState::from_snapshot(snapshot);
        if !repairs.is_empty() {
            violations.push(format!("latest snapshot needed repairs: {repairs:?}"));
        }
        violations.extend(restored.check_invariants());
    }
    violations
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_registries_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let violations = rt.block_on(run_ops(ops));
        prop_assert!(violations.is_empty(), "violations: {:#?}", violations);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submissions_never_overfill_nodes() {
    let h = harness();
    for n in 0..3 {
        h.coordinator
            .register_node(registration(&node_id(n), &[], 2))
            .await
            .unwrap();
    }

    let submissions = (0..20u8).map(|t| {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .submit_task(TaskSubmission::new(task_id(t), TaskPriority::Medium, &[]))
                .await
        })
    });
    for joined in join_all(submissions).await {
        joined.unwrap().unwrap();
    }

    // Sweeps racing each other must not double-place anything
    let sweeps = (0..4).map(|_| {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.scheduler().schedule_pending().await })
    });
    join_all(sweeps).await;
    assert!(h.coordinator.check_invariants().await.is_empty());

    // Pushes that lost a race were withdrawn; a quiet sweep fills what is left
    h.coordinator.scheduler().schedule_pending().await;

    assert!(h.coordinator.check_invariants().await.is_empty());
    let queue = h.coordinator.get_queue_status().await;
    assert_eq!(queue.active_tasks, 6);
    assert_eq!(queue.pending_tasks, 14);
    assert_eq!(queue.current_load, 6);
}
