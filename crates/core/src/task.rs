//! Task decomposition domain types.
//!
//! A task is a decomposed unit of user intent. Complex requests become a
//! parent task whose subtasks form a dependency DAG; the orchestration
//! loop resolves subtasks as their dependencies complete. A failed
//! dependency blocks everything downstream of it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a task. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// A dependency failed, so this task can never start.
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A unit of user intent, optionally decomposed into dependent subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: TaskId,

    /// What this task is meant to accomplish.
    pub description: String,

    /// Current lifecycle state.
    pub status: TaskStatus,

    /// IDs of sibling subtasks that must complete first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<TaskId>,

    /// Ordered subtasks. Must form a DAG over `dependencies`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<Task>,

    /// Outcome text once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Failure reason once failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// Create a pending task with no subtasks.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            subtasks: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// Find the first subtask whose dependencies loop back to itself,
    /// directly or transitively. `None` means the subtask graph is a DAG.
    pub fn dependency_cycle(&self) -> Option<TaskId> {
        let deps: HashMap<&TaskId, &Vec<TaskId>> = self
            .subtasks
            .iter()
            .map(|t| (&t.id, &t.dependencies))
            .collect();

        for start in self.subtasks.iter().map(|t| &t.id) {
            let mut visited: HashSet<&TaskId> = HashSet::new();
            let mut stack: Vec<&TaskId> = vec![start];

            while let Some(current) = stack.pop() {
                for dep in deps.get(current).copied().into_iter().flatten() {
                    if dep == start {
                        return Some(start.clone());
                    }
                    if visited.insert(dep) {
                        stack.push(dep);
                    }
                }
            }
        }

        None
    }

    /// Whether unfinished work still gates on other subtasks. A failure
    /// while this holds is critical: dependents can no longer proceed.
    pub fn has_pending_dependents(&self) -> bool {
        self.subtasks
            .iter()
            .any(|t| t.status == TaskStatus::Pending && !t.dependencies.is_empty())
    }

    /// Subtasks ready to start: pending, with every dependency completed.
    pub fn next_ready(&self) -> Vec<&Task> {
        let completed: HashSet<&TaskId> = self
            .subtasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| &t.id)
            .collect();

        self.subtasks
            .iter()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.dependencies.iter().all(|d| completed.contains(d))
            })
            .collect()
    }

    /// Mark a subtask completed and record its result.
    pub fn complete_subtask(&mut self, id: &TaskId, result: impl Into<String>) {
        if let Some(task) = self.subtasks.iter_mut().find(|t| &t.id == id) {
            task.status = TaskStatus::Completed;
            task.result = Some(result.into());
        }
        self.refresh_status();
    }

    /// Mark a subtask failed and block everything that depends on it.
    pub fn fail_subtask(&mut self, id: &TaskId, error: impl Into<String>) {
        if let Some(task) = self.subtasks.iter_mut().find(|t| &t.id == id) {
            task.status = TaskStatus::Failed;
            task.error = Some(error.into());
        }

        // Propagate: anything depending on a failed or blocked subtask
        // becomes blocked, transitively.
        loop {
            let unavailable: HashSet<TaskId> = self
                .subtasks
                .iter()
                .filter(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Blocked))
                .map(|t| t.id.clone())
                .collect();

            let mut changed = false;
            for task in &mut self.subtasks {
                if task.status == TaskStatus::Pending
                    && task.dependencies.iter().any(|d| unavailable.contains(d))
                {
                    task.status = TaskStatus::Blocked;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        self.refresh_status();
    }

    /// Derive the parent status from subtask states.
    fn refresh_status(&mut self) {
        if self.subtasks.is_empty() {
            return;
        }
        if self
            .subtasks
            .iter()
            .all(|t| t.status == TaskStatus::Completed)
        {
            self.status = TaskStatus::Completed;
        } else if self
            .subtasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Blocked))
        {
            // A blocked subtask can never run, so the parent cannot finish.
            self.status = TaskStatus::Failed;
        } else {
            self.status = TaskStatus::InProgress;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_of_three() -> (Task, TaskId, TaskId, TaskId) {
        let a = Task::new("analyze the module");
        let mut b = Task::new("apply the refactor");
        let mut c = Task::new("update the tests");
        b.dependencies = vec![a.id.clone()];
        c.dependencies = vec![b.id.clone()];

        let (ida, idb, idc) = (a.id.clone(), b.id.clone(), c.id.clone());
        let mut parent = Task::new("refactor the parser");
        parent.subtasks = vec![a, b, c];
        (parent, ida, idb, idc)
    }

    #[test]
    fn ready_respects_dependencies() {
        let (parent, ida, idb, _) = plan_of_three();

        let ready: Vec<&TaskId> = parent.next_ready().iter().map(|t| &t.id).collect();
        assert_eq!(ready, vec![&ida]);

        let mut parent = parent;
        parent.complete_subtask(&ida, "analysis done");
        let ready: Vec<&TaskId> = parent.next_ready().iter().map(|t| &t.id).collect();
        assert_eq!(ready, vec![&idb]);
    }

    #[test]
    fn failed_dependency_blocks_downstream() {
        let (mut parent, ida, idb, idc) = plan_of_three();

        parent.complete_subtask(&ida, "done");
        parent.fail_subtask(&idb, "refactor broke the build");

        let c = parent.subtasks.iter().find(|t| t.id == idc).unwrap();
        assert_eq!(c.status, TaskStatus::Blocked);
        assert_eq!(parent.status, TaskStatus::Failed);
        assert!(parent.next_ready().is_empty());
    }

    #[test]
    fn all_complete_completes_parent() {
        let (mut parent, ida, idb, idc) = plan_of_three();
        parent.complete_subtask(&ida, "ok");
        parent.complete_subtask(&idb, "ok");
        parent.complete_subtask(&idc, "ok");
        assert_eq!(parent.status, TaskStatus::Completed);
    }

    #[test]
    fn pending_dependents_clear_as_the_plan_finishes() {
        let (mut parent, ida, idb, idc) = plan_of_three();
        assert!(parent.has_pending_dependents());

        parent.complete_subtask(&ida, "ok");
        parent.complete_subtask(&idb, "ok");
        assert!(parent.has_pending_dependents());

        parent.complete_subtask(&idc, "ok");
        assert!(!parent.has_pending_dependents());

        let flat = Task::new("single step");
        assert!(!flat.has_pending_dependents());
    }

    #[test]
    fn cycle_is_detected() {
        let mut a = Task::new("first");
        let mut b = Task::new("second");
        a.dependencies = vec![b.id.clone()];
        b.dependencies = vec![a.id.clone()];

        let mut parent = Task::new("cyclic plan");
        parent.subtasks = vec![a, b];
        assert!(parent.dependency_cycle().is_some());
    }

    #[test]
    fn linear_plan_is_acyclic() {
        let (parent, _, _, _) = plan_of_three();
        assert!(parent.dependency_cycle().is_none());
    }
}
