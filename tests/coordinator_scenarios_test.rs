// End-to-end placement scenarios through the public coordinator API

mod fixtures;

use cluster_coordinator::{
    CoordinatorError, NodeStatus, RejectionReason, ScheduleOutcome, StatusReport, TaskPriority,
    TaskStatus, TaskSubmission,
};
use fixtures::{address_of, harness, registration};

#[tokio::test]
async fn scenario_a_lower_load_wins_at_equal_specialty_match() {
    let h = harness();
    h.coordinator
        .register_node(registration("N2", &["backend"], 3))
        .await
        .unwrap();

    // Bring N2 to 2/3 before N1 exists
    for id in ["X1", "X2"] {
        let submitted = h
            .coordinator
            .submit_task(TaskSubmission::new(id, TaskPriority::Medium, &["backend"]))
            .await
            .unwrap();
        assert_eq!(
            submitted.schedule,
            ScheduleOutcome::Assigned {
                node_id: "N2".to_string()
            }
        );
    }

    h.coordinator
        .register_node(registration("N1", &["backend"], 3))
        .await
        .unwrap();

    let submitted = h
        .coordinator
        .submit_task(TaskSubmission::new("T1", TaskPriority::Medium, &["backend"]))
        .await
        .unwrap();

    assert_eq!(submitted.task.status, TaskStatus::Assigned);
    assert_eq!(submitted.task.assigned_node.as_deref(), Some("N1"));
    assert_eq!(h.coordinator.get_node("N1").await.unwrap().current_tasks, vec!["T1"]);
    assert_eq!(h.coordinator.get_node("N2").await.unwrap().load(), 2);
}

#[tokio::test]
async fn scenario_b_unregistering_a_node_moves_its_work() {
    let h = harness();
    h.coordinator
        .register_node(registration("N1", &[], 2))
        .await
        .unwrap();
    h.coordinator
        .submit_task(TaskSubmission::new("T2", TaskPriority::High, &[]))
        .await
        .unwrap();
    h.coordinator
        .update_task_status(
            "T2",
            StatusReport {
                status: TaskStatus::InProgress,
                node_id: Some("N1".to_string()),
                error: None,
            },
        )
        .await
        .unwrap();

    h.coordinator
        .register_node(registration("N2", &[], 2))
        .await
        .unwrap();

    let requeued = h.coordinator.unregister_node("N1").await.unwrap();
    assert_eq!(requeued.requeued, vec!["T2"]);
    assert!(requeued.attempts[0].outcome.is_assigned());

    let task = h.coordinator.get_task("T2").await.unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assigned_node.as_deref(), Some("N2"));
    assert!(task.started_at.is_none());
    assert!(matches!(
        h.coordinator.get_node("N1").await,
        Err(CoordinatorError::NodeNotFound(_))
    ));
    assert!(h.coordinator.check_invariants().await.is_empty());
}

#[tokio::test]
async fn scenario_b_without_spare_node_task_waits_pending() {
    let h = harness();
    h.coordinator
        .register_node(registration("N1", &[], 1))
        .await
        .unwrap();
    h.coordinator
        .submit_task(TaskSubmission::new("T2", TaskPriority::High, &[]))
        .await
        .unwrap();

    let requeued = h.coordinator.unregister_node("N1").await.unwrap();
    assert_eq!(requeued.attempts[0].outcome, ScheduleOutcome::NoCandidate);

    let task = h.coordinator.get_task("T2").await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.assigned_node, None);
}

#[tokio::test]
async fn scenario_c_unmatched_requirements_still_placed() {
    let h = harness();
    h.coordinator
        .register_node(registration("N1", &["backend"], 2))
        .await
        .unwrap();

    let submitted = h
        .coordinator
        .submit_task(TaskSubmission::new("T3", TaskPriority::Low, &["ml"]))
        .await
        .unwrap();

    assert_eq!(submitted.task.status, TaskStatus::Assigned);
    assert_eq!(submitted.task.assigned_node.as_deref(), Some("N1"));
}

#[tokio::test]
async fn scenario_d_duplicate_submission_leaves_original_untouched() {
    let h = harness();
    let first = h
        .coordinator
        .submit_task(TaskSubmission::new("T4", TaskPriority::Urgent, &[]))
        .await
        .unwrap();

    let second = h
        .coordinator
        .submit_task(TaskSubmission::new("T4", TaskPriority::Low, &["other"]))
        .await;
    assert!(matches!(second, Err(CoordinatorError::DuplicateTask(ref id)) if id == "T4"));

    let stored = h.coordinator.get_task("T4").await.unwrap();
    assert_eq!(stored, first.task);
    assert_eq!(stored.priority, TaskPriority::Urgent);
}

#[tokio::test]
async fn unreachable_node_is_not_registered() {
    let h = harness();
    h.client.set_down(&address_of("N1"), true);

    let result = h.coordinator.register_node(registration("N1", &[], 1)).await;
    assert!(matches!(result, Err(CoordinatorError::Registration { .. })));
    assert!(h.coordinator.list_nodes().await.is_empty());
}

#[tokio::test]
async fn rejected_push_keeps_task_pending() {
    let h = harness();
    h.coordinator
        .register_node(registration("N1", &[], 1))
        .await
        .unwrap();
    h.client
        .reject_with(&address_of("N1"), Some(RejectionReason::AtCapacity));

    let submitted = h
        .coordinator
        .submit_task(TaskSubmission::new("T1", TaskPriority::Medium, &[]))
        .await
        .unwrap();
    assert_eq!(
        submitted.schedule,
        ScheduleOutcome::Rejected {
            node_id: "N1".to_string(),
            reason: RejectionReason::AtCapacity
        }
    );
    assert_eq!(submitted.task.status, TaskStatus::Pending);
    assert!(h.coordinator.get_node("N1").await.unwrap().current_tasks.is_empty());
    assert_eq!(h.coordinator.get_metrics().assignment_rejections, 1);
}

#[tokio::test]
async fn node_that_keeps_rejecting_does_not_starve_the_queue() {
    let h = harness();
    h.coordinator
        .register_node(registration("N1", &["ml"], 4))
        .await
        .unwrap();
    h.coordinator
        .register_node(registration("N2", &[], 4))
        .await
        .unwrap();
    h.client
        .reject_with(&address_of("N1"), Some(RejectionReason::AtCapacity));

    for id in ["T1", "T2"] {
        let submitted = h
            .coordinator
            .submit_task(TaskSubmission::new(id, TaskPriority::High, &["ml"]))
            .await
            .unwrap();
        assert_eq!(
            submitted.schedule,
            ScheduleOutcome::Assigned {
                node_id: "N2".to_string()
            }
        );
    }

    assert!(h.coordinator.get_node("N1").await.unwrap().current_tasks.is_empty());
    assert_eq!(h.coordinator.get_metrics().assignment_rejections, 2);
    assert!(h.coordinator.check_invariants().await.is_empty());
}

#[tokio::test]
async fn cancel_releases_capacity_and_stops_node() {
    let h = harness();
    h.coordinator
        .register_node(registration("N1", &[], 1))
        .await
        .unwrap();
    h.coordinator
        .submit_task(TaskSubmission::new("T1", TaskPriority::Medium, &[]))
        .await
        .unwrap();

    let outcome = h.coordinator.cancel_task("T1").await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Cancelled);
    assert_eq!(outcome.released_from.as_deref(), Some("N1"));
    assert!(h.coordinator.get_node("N1").await.unwrap().current_tasks.is_empty());
    assert_eq!(h.client.stops(), vec![(address_of("N1"), "T1".to_string())]);

    // Capacity is free again
    let next = h
        .coordinator
        .submit_task(TaskSubmission::new("T2", TaskPriority::Medium, &[]))
        .await
        .unwrap();
    assert!(next.schedule.is_assigned());

    // A second cancel is a no-op, cancelling finished work is not allowed
    assert!(h.coordinator.cancel_task("T1").await.is_ok());
    h.coordinator
        .update_task_status(
            "T2",
            StatusReport {
                status: TaskStatus::InProgress,
                node_id: Some("N1".to_string()),
                error: None,
            },
        )
        .await
        .unwrap();
    h.coordinator
        .update_task_status(
            "T2",
            StatusReport {
                status: TaskStatus::Completed,
                node_id: Some("N1".to_string()),
                error: None,
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        h.coordinator.cancel_task("T2").await,
        Err(CoordinatorError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn status_report_from_wrong_node_is_refused() {
    let h = harness();
    h.coordinator
        .register_node(registration("N1", &[], 1))
        .await
        .unwrap();
    h.coordinator
        .submit_task(TaskSubmission::new("T1", TaskPriority::Medium, &[]))
        .await
        .unwrap();

    let result = h
        .coordinator
        .update_task_status(
            "T1",
            StatusReport {
                status: TaskStatus::InProgress,
                node_id: Some("N9".to_string()),
                error: None,
            },
        )
        .await;
    assert!(matches!(result, Err(CoordinatorError::NotAssignedToNode { .. })));
    assert_eq!(h.coordinator.get_task("T1").await.unwrap().status, TaskStatus::Assigned);
}

#[tokio::test]
async fn maintenance_drains_and_online_restores() {
    let h = harness();
    h.coordinator
        .register_node(registration("N1", &[], 2))
        .await
        .unwrap();
    h.coordinator
        .submit_task(TaskSubmission::new("T1", TaskPriority::Medium, &[]))
        .await
        .unwrap();

    let drained = h.coordinator.set_node_maintenance("N1").await.unwrap();
    assert_eq!(drained.requeued, vec!["T1"]);
    assert_eq!(
        h.coordinator.get_node("N1").await.unwrap().status,
        NodeStatus::Maintenance
    );
    assert_eq!(h.coordinator.get_task("T1").await.unwrap().status, TaskStatus::Pending);

    let node = h.coordinator.set_node_online("N1").await.unwrap();
    assert_eq!(node.status, NodeStatus::Online);

    let swept = h.coordinator.scheduler().schedule_pending().await;
    assert!(swept[0].outcome.is_assigned());
    assert!(h.coordinator.check_invariants().await.is_empty());
}

#[tokio::test]
async fn pending_sweep_serves_priority_then_age() {
    let h = harness();
    for (id, priority) in [
        ("low", TaskPriority::Low),
        ("urgent", TaskPriority::Urgent),
        ("medium", TaskPriority::Medium),
    ] {
        h.coordinator
            .submit_task(TaskSubmission::new(id, priority, &[]))
            .await
            .unwrap();
    }
    h.coordinator
        .register_node(registration("N1", &[], 2))
        .await
        .unwrap();

    let swept = h.coordinator.scheduler().schedule_pending().await;
    let order: Vec<&str> = swept.iter().map(|a| a.task_id.as_str()).collect();
    assert_eq!(order, vec!["urgent", "medium", "low"]);

    assert_eq!(
        h.coordinator.get_task("low").await.unwrap().status,
        TaskStatus::Pending
    );
    let queue = h.coordinator.get_queue_status().await;
    assert_eq!(queue.pending_tasks, 1);
    assert_eq!(queue.active_tasks, 2);
    assert_eq!(queue.available_nodes, 0);
}
