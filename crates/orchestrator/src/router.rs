//! Request classification — task type and complexity tier.
//!
//! Classification is pure and deterministic: keyword heuristics over the
//! request text, plus word count, file mentions, and capability-indicator
//! counts. The recovery history can escalate the tier when the same
//! failure pattern keeps recurring. Classification never fails; anything
//! unrecognized is an exploration at medium complexity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use forgeloop_core::recovery::ErrorRecord;

/// What kind of work the request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Implement,
    Debug,
    Refactor,
    Explain,
    Review,
    Test,
    Document,
    Explore,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implement => "implement",
            Self::Debug => "debug",
            Self::Refactor => "refactor",
            Self::Explain => "explain",
            Self::Review => "review",
            Self::Test => "test",
            Self::Document => "document",
            Self::Explore => "explore",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How much reasoning power the request needs. Maps to an engine profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

impl ComplexityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// The next tier up; `High` stays `High`.
    pub fn escalated(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

impl std::fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub task_type: TaskType,
    pub tier: ComplexityTier,
}

/// Session context consulted during classification.
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext<'a> {
    /// Bytes of conversation history (large context pushes the tier up).
    pub history_bytes: usize,
    /// Recent recovery records for the active task.
    pub recent_errors: &'a [ErrorRecord],
}

const HIGH_COMPLEXITY: &[&str] = &[
    "architecture",
    "design system",
    "multi-file",
    "refactor entire",
    "migrate",
    "redesign",
    "complex algorithm",
    "optimize performance",
    "debug complex",
    "analyze entire",
];

const LOW_COMPLEXITY: &[&str] = &[
    "explain",
    "format",
    "add comment",
    "fix typo",
    "rename variable",
    "simple edit",
    "documentation",
    "what does",
    "how does",
];

const FILE_EXTENSIONS: &[&str] = &[".rs", ".py", ".js", ".ts", ".java", ".go", ".toml"];

const CAPABILITY_INDICATORS: &[&str] = &["read", "write", "search", "execute"];

/// Classifies user requests into a task type and complexity tier.
pub struct Router {
    /// Same-pattern failure count at which the tier escalates.
    escalation_threshold: usize,
}

impl Router {
    pub fn new(escalation_threshold: usize) -> Self {
        Self {
            escalation_threshold,
        }
    }

    /// Classify a request. Pure; never fails.
    pub fn classify(&self, request: &str, context: &ClassifyContext<'_>) -> Classification {
        let task_type = detect_task_type(request);
        let mut tier = analyze_complexity(request, context.history_bytes);

        if let Some(pattern) = self.repeated_failure(context.recent_errors) {
            let escalated = tier.escalated();
            if escalated != tier {
                debug!(
                    pattern = %pattern,
                    from = %tier,
                    to = %escalated,
                    "Escalating tier after repeated failures"
                );
                tier = escalated;
            }
        }

        debug!(task_type = %task_type, tier = %tier, "Classified request");
        Classification { task_type, tier }
    }

    /// The dominant failure pattern, when it has recurred at or past the
    /// threshold.
    fn repeated_failure(&self, errors: &[ErrorRecord]) -> Option<String> {
        if errors.is_empty() || self.escalation_threshold == 0 {
            return None;
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in errors {
            *counts.entry(record.pattern.as_str()).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count >= self.escalation_threshold)
            .max_by_key(|(_, count)| *count)
            .map(|(pattern, _)| pattern.to_string())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Detect the task type from keyword indicators, checked in priority
/// order. Falls back to `Explore`.
pub fn detect_task_type(request: &str) -> TaskType {
    let lower = request.to_lowercase();
    let contains_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if contains_any(&["implement", "create", "build", "add", "write new"]) {
        return TaskType::Implement;
    }
    if contains_any(&["debug", "fix", "bug", "error", "broken", "not working"]) {
        return TaskType::Debug;
    }
    if contains_any(&["refactor", "improve", "clean up", "optimize", "restructure"]) {
        return TaskType::Refactor;
    }
    if contains_any(&["explain", "what does", "how does", "why does", "understand"]) {
        return TaskType::Explain;
    }
    if contains_any(&["review", "check", "audit", "analyze quality"]) {
        return TaskType::Review;
    }
    if contains_any(&["test", "write tests", "add tests", "coverage"]) {
        return TaskType::Test;
    }
    if contains_any(&["document", "readme", "docstring", "comments"]) {
        return TaskType::Document;
    }

    TaskType::Explore
}

/// Analyze complexity from the request text and conversation size.
pub fn analyze_complexity(request: &str, history_bytes: usize) -> ComplexityTier {
    let lower = request.to_lowercase();

    if HIGH_COMPLEXITY.iter().any(|w| lower.contains(w)) {
        return ComplexityTier::High;
    }
    if LOW_COMPLEXITY.iter().any(|w| lower.contains(w)) {
        return ComplexityTier::Low;
    }

    // A large accumulated conversation means multi-file work.
    if history_bytes > 4000 {
        return ComplexityTier::High;
    }

    let word_count = request.split_whitespace().count();
    if word_count > 100 {
        return ComplexityTier::High;
    }

    let file_mentions: usize = FILE_EXTENSIONS
        .iter()
        .map(|ext| lower.matches(ext).count())
        .sum();
    if file_mentions > 5 {
        return ComplexityTier::High;
    }
    if file_mentions > 2 {
        return ComplexityTier::Medium;
    }

    let capability_hints: usize = CAPABILITY_INDICATORS
        .iter()
        .map(|word| lower.matches(word).count())
        .sum();
    if capability_hints > 3 {
        return ComplexityTier::Medium;
    }

    ComplexityTier::Medium
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_core::recovery::{ErrorPattern, RecoveryOutcome, RecoveryStrategy};

    fn classify(request: &str) -> Classification {
        Router::default().classify(request, &ClassifyContext::default())
    }

    #[test]
    fn implement_requests_are_detected() {
        let c = classify("Implement a rate limiter for the API client");
        assert_eq!(c.task_type, TaskType::Implement);
    }

    #[test]
    fn debug_requests_are_detected() {
        let c = classify("Fix the bug where sessions leak on disconnect");
        assert_eq!(c.task_type, TaskType::Debug);
    }

    #[test]
    fn unrecognized_request_defaults_to_explore_medium() {
        let c = classify("qwertyuiop");
        assert_eq!(c.task_type, TaskType::Explore);
        assert_eq!(c.tier, ComplexityTier::Medium);
    }

    #[test]
    fn empty_request_never_panics() {
        let c = classify("");
        assert_eq!(c.task_type, TaskType::Explore);
        assert_eq!(c.tier, ComplexityTier::Medium);
    }

    #[test]
    fn architecture_keywords_go_high() {
        let c = classify("Redesign the storage architecture for multi-tenant use");
        assert_eq!(c.tier, ComplexityTier::High);
    }

    #[test]
    fn trivial_edits_go_low() {
        let c = classify("fix typo in the greeting string");
        assert_eq!(c.tier, ComplexityTier::Low);
    }

    #[test]
    fn long_requests_go_high() {
        let request = "please ".repeat(101);
        let c = classify(&request);
        assert_eq!(c.tier, ComplexityTier::High);
    }

    #[test]
    fn many_file_mentions_go_high() {
        let c = classify("update a.rs b.rs c.rs d.rs e.rs f.rs together");
        assert_eq!(c.tier, ComplexityTier::High);
    }

    #[test]
    fn a_few_file_mentions_go_medium() {
        let c = classify("sync config.rs with state.rs and main.rs");
        assert_eq!(c.tier, ComplexityTier::Medium);
    }

    #[test]
    fn repeated_failures_escalate_tier() {
        let router = Router::new(2);
        let errors: Vec<ErrorRecord> = (0..3)
            .map(|_| {
                ErrorRecord::new(
                    ErrorPattern::Timeout,
                    "shell",
                    "command timed out",
                    RecoveryStrategy::Retry,
                    RecoveryOutcome::Skipped,
                )
            })
            .collect();

        let context = ClassifyContext {
            history_bytes: 0,
            recent_errors: &errors,
        };

        let c = router.classify("fix typo in the greeting string", &context);
        // Low escalates one step under repeated failures.
        assert_eq!(c.tier, ComplexityTier::Medium);
    }

    #[test]
    fn distinct_failures_below_threshold_do_not_escalate() {
        let router = Router::new(2);
        let errors = vec![
            ErrorRecord::new(
                ErrorPattern::Timeout,
                "shell",
                "timed out",
                RecoveryStrategy::Retry,
                RecoveryOutcome::Skipped,
            ),
            ErrorRecord::new(
                ErrorPattern::NotFound,
                "file_read",
                "no such file",
                RecoveryStrategy::Alternative,
                RecoveryOutcome::Suggested,
            ),
        ];

        let context = ClassifyContext {
            history_bytes: 0,
            recent_errors: &errors,
        };

        let c = router.classify("fix typo here", &context);
        assert_eq!(c.tier, ComplexityTier::Low);
    }

    #[test]
    fn high_tier_stays_high_on_escalation() {
        assert_eq!(ComplexityTier::High.escalated(), ComplexityTier::High);
        assert_eq!(ComplexityTier::Low.escalated(), ComplexityTier::Medium);
    }

    #[test]
    fn classification_is_deterministic() {
        let request = "Refactor the session store and update tests";
        let a = classify(request);
        let b = classify(request);
        assert_eq!(a, b);
    }
}
