//! Heuristic task decomposition.
//!
//! Requests that bundle several pieces of work ("implement X and test
//! it") become a parent task with dependent subtasks, so progress
//! survives iteration limits and failed steps block only what depends
//! on them. Decomposition is keyword-driven; single-purpose requests
//! stay a single task.

use forgeloop_core::task::Task;
use tracing::debug;

/// Phrases that mark a request as spanning multiple pieces of work.
const COMPLEXITY_INDICATORS: &[&str] = &[
    " and then ",
    " after ",
    " before ",
    "first",
    "second",
    "third",
    "finally",
    "implement",
    "test",
    "deploy",
    "document",
    "multiple",
    "several",
    "various",
    "refactor",
    "migrate",
    "upgrade",
];

pub struct TaskPlanner;

impl TaskPlanner {
    /// Two or more indicators mean the request is worth decomposing.
    pub fn needs_decomposition(request: &str) -> bool {
        let lowered = request.to_lowercase();
        let count = COMPLEXITY_INDICATORS
            .iter()
            .filter(|indicator| lowered.contains(*indicator))
            .count();
        count >= 2
    }

    /// Build a task for the request, decomposed into a dependency chain
    /// when a known pattern applies.
    pub fn plan(request: &str) -> Task {
        let lowered = request.to_lowercase();
        let mut parent = Task::new(request);

        let subtasks = if lowered.contains("implement") && lowered.contains("test") {
            Self::chain(vec![
                format!("Implement: {request}"),
                format!("Test: {request}"),
            ])
        } else if lowered.contains("refactor") {
            let mut steps = vec![
                "Analyze the code to refactor".to_string(),
                "Perform the refactoring".to_string(),
            ];
            if lowered.contains("test") {
                steps.push("Update tests".to_string());
            }
            Self::chain(steps)
        } else if request.contains(" and ") {
            Self::chain(
                request
                    .split(" and ")
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            )
        } else {
            Vec::new()
        };

        if !subtasks.is_empty() {
            debug!(steps = subtasks.len(), "Decomposed request into subtasks");
            parent.subtasks = subtasks;
        }
        parent
    }

    /// Turn step descriptions into a linear dependency chain.
    fn chain(descriptions: Vec<String>) -> Vec<Task> {
        let mut tasks: Vec<Task> = Vec::with_capacity(descriptions.len());
        for description in descriptions {
            let mut task = Task::new(description);
            if let Some(previous) = tasks.last() {
                task.dependencies = vec![previous.id.clone()];
            }
            tasks.push(task);
        }
        tasks
    }
}
