// Task registry - the task table plus the lifecycle transition rules

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::types::{Task, TaskPriority, TaskStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Transitions a caller may request directly.
///
/// Requeue (Assigned/InProgress -> Pending) and retry (Failed -> Pending) are
/// produced internally and never requested.
pub fn is_allowed_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, Assigned)
            | (Assigned, InProgress)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (Pending, Cancelled)
            | (Assigned, Cancelled)
            | (InProgress, Cancelled)
    )
}

#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        task_id: &str,
        priority: TaskPriority,
        requirements: BTreeSet<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<&Task> {
        if self.tasks.contains_key(task_id) {
            return Err(CoordinatorError::DuplicateTask(task_id.to_string()));
        }
        let task = Task::new(task_id, priority, requirements, max_retries, now);
        Ok(self.tasks.entry(task_id.to_string()).or_insert(task))
    }

    pub fn insert_restored(&mut self, task: Task) {
        self.tasks.insert(task.task_id.clone(), task);
    }

    pub fn get(&self, task_id: &str) -> CoordinatorResult<&Task> {
        self.tasks
            .get(task_id)
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))
    }

    pub fn get_mut(&mut self, task_id: &str) -> CoordinatorResult<&mut Task> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| CoordinatorError::TaskNotFound(task_id.to_string()))
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn list(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn list_by_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.values().filter(|t| t.status == status).collect()
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Pending tasks in sweep order: priority high to low, then oldest first,
    /// then task id
    pub fn pending_in_order(&self) -> Vec<&Task> {
        let mut pending = self.list_by_status(TaskStatus::Pending);
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        pending
    }

    /// Active tasks whose `assigned_node` is the given node
    pub fn active_on_node(&self, node_id: &str) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.status.is_active() && t.assigned_node.as_deref() == Some(node_id))
            .collect()
    }

    /// Pending -> Assigned
    pub fn mark_assigned(
        &mut self,
        task_id: &str,
        node_id: &str,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<()> {
        let task = self.get_mut(task_id)?;
        if task.status != TaskStatus::Pending {
            return Err(CoordinatorError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Assigned,
            });
        }
        task.status = TaskStatus::Assigned;
        task.assigned_node = Some(node_id.to_string());
        task.assigned_at = Some(now);
        Ok(())
    }

    /// Back to Pending with assignment fields cleared. Returns the node that
    /// held the task, if any.
    pub fn requeue(&mut self, task_id: &str) -> CoordinatorResult<Option<String>> {
        let task = self.get_mut(task_id)?;
        if !task.status.is_active() {
            return Err(CoordinatorError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Pending,
            });
        }
        task.status = TaskStatus::Pending;
        task.assigned_at = None;
        task.started_at = None;
        Ok(task.assigned_node.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(is_allowed_transition(Pending, Assigned));
        assert!(is_allowed_transition(Assigned, InProgress));
        assert!(is_allowed_transition(InProgress, Completed));
        assert!(is_allowed_transition(InProgress, Failed));
        assert!(is_allowed_transition(Assigned, Cancelled));

        assert!(!is_allowed_transition(Pending, InProgress));
        assert!(!is_allowed_transition(Assigned, Completed));
        assert!(!is_allowed_transition(Completed, InProgress));
        assert!(!is_allowed_transition(Cancelled, Pending));
        assert!(!is_allowed_transition(Failed, Pending));
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut registry = TaskRegistry::new();
        let now = Utc::now();
        registry
            .insert("T1", TaskPriority::Medium, BTreeSet::new(), 3, now)
            .unwrap();
        let err = registry
            .insert("T1", TaskPriority::High, BTreeSet::new(), 3, now)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateTask(_)));
        assert_eq!(registry.get("T1").unwrap().priority, TaskPriority::Medium);
    }

    #[test]
    fn test_pending_order() {
        let mut registry = TaskRegistry::new();
        let t0 = Utc::now();
        registry.insert("b-low", TaskPriority::Low, BTreeSet::new(), 3, t0).unwrap();
        registry
            .insert("c-high-late", TaskPriority::High, BTreeSet::new(), 3, t0 + Duration::seconds(5))
            .unwrap();
        registry.insert("d-high-early", TaskPriority::High, BTreeSet::new(), 3, t0).unwrap();
        registry.insert("a-high-early", TaskPriority::High, BTreeSet::new(), 3, t0).unwrap();
        registry.insert("e-urgent", TaskPriority::Urgent, BTreeSet::new(), 3, t0).unwrap();

        let order: Vec<&str> = registry
            .pending_in_order()
            .into_iter()
            .map(|t| t.task_id.as_str())
            .collect();
        assert_eq!(
            order,
            vec!["e-urgent", "a-high-early", "d-high-early", "c-high-late", "b-low"]
        );
    }

    #[test]
    fn test_assign_then_requeue_clears_fields() {
        let mut registry = TaskRegistry::new();
        let now = Utc::now();
        registry.insert("T1", TaskPriority::Medium, BTreeSet::new(), 3, now).unwrap();
        registry.mark_assigned("T1", "n1", now).unwrap();
        assert_eq!(registry.active_on_node("n1").len(), 1);

        let holder = registry.requeue("T1").unwrap();
        assert_eq!(holder.as_deref(), Some("n1"));

        let task = registry.get("T1").unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_node.is_none());
        assert!(task.assigned_at.is_none());
        assert!(registry.active_on_node("n1").is_empty());
    }

    #[test]
    fn test_mark_assigned_requires_pending() {
        let mut registry = TaskRegistry::new();
        let now = Utc::now();
        registry.insert("T1", TaskPriority::Medium, BTreeSet::new(), 3, now).unwrap();
        registry.mark_assigned("T1", "n1", now).unwrap();

        let err = registry.mark_assigned("T1", "n2", now).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
    }
}
