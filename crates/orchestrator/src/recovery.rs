//! Failure classification and recovery selection.
//!
//! When an invocation fails, the recovery manager matches the error
//! text against known patterns and produces an ordered list of
//! recovery actions: retry with backoff, establish a missing
//! precondition, steer toward an alternative capability, skip, or
//! abort. Fatal markers short-circuit straight to abort, and retries
//! stop being offered once the attempt budget is spent.
//!
//! Every handled failure lands in a bounded history; the router reads
//! it to escalate complexity when the same pattern keeps recurring.

use forgeloop_core::recovery::{ErrorPattern, ErrorRecord, RecoveryStrategy};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_MAX_HISTORY: usize = 100;
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Message fragments that make a failure unrecoverable.
const FATAL_MARKERS: &[&str] = &["syntax error", "invalid syntax", "fatal", "critical"];

/// One suggested remediation, ordered by preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAction {
    pub strategy: RecoveryStrategy,
    pub description: String,
}

impl RecoveryAction {
    fn new(strategy: RecoveryStrategy, description: impl Into<String>) -> Self {
        Self {
            strategy,
            description: description.into(),
        }
    }
}

/// Aggregate failure counters.
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    pub total_errors: u64,
    pub by_capability: HashMap<String, u64>,
    pub by_pattern: HashMap<&'static str, u64>,
}

impl RecoveryStats {
    pub fn most_common_capability(&self) -> Option<&str> {
        self.by_capability
            .iter()
            .max_by_key(|(_, count)| *count)
            .map(|(name, _)| name.as_str())
    }

    pub fn most_common_pattern(&self) -> Option<&'static str> {
        self.by_pattern
            .iter()
            .max_by_key(|(_, count)| *count)
            .map(|(pattern, _)| *pattern)
    }
}

/// Classifies failures and keeps the bounded error history.
pub struct RecoveryManager {
    max_attempts: u32,
    retry_base: Duration,
    max_history: usize,
    history: Vec<ErrorRecord>,
    stats: RecoveryStats,
}

impl RecoveryManager {
    pub fn new(max_attempts: u32, retry_base: Duration) -> Self {
        Self {
            max_attempts,
            retry_base,
            max_history: DEFAULT_MAX_HISTORY,
            history: Vec::new(),
            stats: RecoveryStats::default(),
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Match the error text against known patterns, most specific first.
    pub fn classify(capability_name: &str, message: &str) -> ErrorPattern {
        let msg = message.to_lowercase();

        if msg.contains("not found")
            || msg.contains("does not exist")
            || msg.contains("no such file")
        {
            ErrorPattern::NotFound
        } else if msg.contains("not allowed")
            || msg.contains("outside allowed")
            || msg.contains("forbidden")
            || msg.contains("traversal")
        {
            ErrorPattern::PathNotAllowed
        } else if msg.contains("permission") || msg.contains("denied") {
            ErrorPattern::PermissionDenied
        } else if msg.contains("git") || capability_name.starts_with("git") {
            ErrorPattern::GitError
        } else if msg.contains("no matches") || msg.contains("no results") {
            ErrorPattern::SearchNoResults
        } else if msg.contains("timeout") || msg.contains("timed out") {
            ErrorPattern::Timeout
        } else if msg.contains("empty") {
            ErrorPattern::EmptyPrecondition
        } else if msg.contains("type") {
            ErrorPattern::TypeMismatch
        } else {
            ErrorPattern::Unknown
        }
    }

    /// Whether the failure is severe enough to stop working on it.
    pub fn should_abort(message: &str) -> bool {
        let msg = message.to_lowercase();
        FATAL_MARKERS.iter().any(|marker| msg.contains(marker))
    }

    /// Ordered recovery actions for a failure on its `attempt`-th try
    /// (1-based). Fatal failures get a single abort action; exhausted
    /// attempts stop offering retries.
    pub fn suggest(
        &self,
        capability_name: &str,
        message: &str,
        attempt: u32,
    ) -> Vec<RecoveryAction> {
        if Self::should_abort(message) {
            return vec![RecoveryAction::new(
                RecoveryStrategy::Abort,
                "Critical error; stop this operation",
            )];
        }

        let pattern = Self::classify(capability_name, message);
        let mut actions = actions_for(pattern);

        if attempt >= self.max_attempts {
            actions.retain(|action| action.strategy != RecoveryStrategy::Retry);
        }
        if actions.is_empty() {
            actions.push(RecoveryAction::new(
                RecoveryStrategy::Abort,
                "No recovery left after repeated attempts",
            ));
        }

        debug!(
            capability = capability_name,
            pattern = %pattern,
            attempt,
            first = %actions[0].strategy,
            "Recovery suggested"
        );
        actions
    }

    /// Exponential backoff before retry `attempt` (1-based): base,
    /// doubled each attempt, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.retry_base.saturating_mul(1u32 << exponent);
        delay.min(MAX_BACKOFF)
    }

    /// Append to the bounded history, dropping the oldest on overflow.
    pub fn record(&mut self, record: ErrorRecord) {
        self.stats.total_errors += 1;
        *self
            .stats
            .by_capability
            .entry(record.capability_name.clone())
            .or_insert(0) += 1;
        *self.stats.by_pattern.entry(record.pattern.as_str()).or_insert(0) += 1;

        if self.history.len() == self.max_history {
            self.history.remove(0);
        }
        self.history.push(record);
    }

    pub fn history(&self) -> &[ErrorRecord] {
        &self.history
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[ErrorRecord] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }
}

/// Render suggestions the way the engine expects to read them.
pub fn format_suggestions(actions: &[RecoveryAction]) -> String {
    if actions.is_empty() {
        return "No specific recovery suggestions available.".to_string();
    }

    let mut lines = vec!["Recovery options:".to_string()];
    for (i, action) in actions.iter().enumerate() {
        lines.push(format!(
            "{}. [{}] {}",
            i + 1,
            action.strategy,
            action.description
        ));
    }
    lines.join("\n")
}

fn actions_for(pattern: ErrorPattern) -> Vec<RecoveryAction> {
    use RecoveryStrategy::*;

    match pattern {
        ErrorPattern::NotFound => vec![
            RecoveryAction::new(Alternative, "List the directory to see available files"),
            RecoveryAction::new(Alternative, "Search for similar file names"),
        ],
        ErrorPattern::PathNotAllowed => vec![
            RecoveryAction::new(Alternative, "Use a path within the allowed workspace roots"),
            RecoveryAction::new(Skip, "Skip this operation and continue with the next step"),
        ],
        ErrorPattern::PermissionDenied => vec![
            RecoveryAction::new(Alternative, "Try reading the target instead of writing it"),
            RecoveryAction::new(Skip, "Skip this operation"),
        ],
        ErrorPattern::GitError => vec![
            RecoveryAction::new(Alternative, "Check git status first"),
            RecoveryAction::new(Skip, "Continue without the git operation"),
        ],
        ErrorPattern::SearchNoResults => vec![
            RecoveryAction::new(Alternative, "Try a broader search pattern"),
            RecoveryAction::new(Alternative, "List directory contents instead"),
        ],
        ErrorPattern::Timeout => vec![
            RecoveryAction::new(Retry, "Retry with a longer timeout"),
            RecoveryAction::new(Alternative, "Try a simpler operation"),
        ],
        ErrorPattern::EmptyPrecondition => vec![
            RecoveryAction::new(Fallback, "Create the missing content first, then retry"),
            RecoveryAction::new(Skip, "Skip this file and continue"),
        ],
        ErrorPattern::TypeMismatch => vec![
            RecoveryAction::new(Alternative, "Adjust the parameters to match the declared schema"),
            RecoveryAction::new(Skip, "Type errors are non-blocking, continue"),
        ],
        ErrorPattern::Unknown => vec![
            RecoveryAction::new(Retry, "Retry the operation once more"),
            RecoveryAction::new(Alternative, "Try a different approach"),
            RecoveryAction::new(Skip, "Skip and continue with the next step"),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeloop_core::recovery::RecoveryOutcome;

    fn manager() -> RecoveryManager {
        RecoveryManager::new(3, Duration::from_millis(500))
    }

    #[test]
    fn classifies_by_priority() {
        assert_eq!(
            RecoveryManager::classify(
                "file_read",
                "Failed to read file: No such file or directory (os error 2)"
            ),
            ErrorPattern::NotFound
        );
        assert_eq!(
            RecoveryManager::classify(
                "file_write",
                "Permission denied: file_write — Path '/etc/passwd' is outside allowed roots"
            ),
            ErrorPattern::PathNotAllowed
        );
        assert_eq!(
            RecoveryManager::classify("shell", "Permission denied by operating system"),
            ErrorPattern::PermissionDenied
        );
        assert_eq!(
            RecoveryManager::classify("git_status", "exit status 128"),
            ErrorPattern::GitError
        );
        assert_eq!(
            RecoveryManager::classify("code_search", "No matches found"),
            ErrorPattern::SearchNoResults
        );
        assert_eq!(
            RecoveryManager::classify("shell", "Capability timed out: shell after 30s"),
            ErrorPattern::Timeout
        );
        assert_eq!(
            RecoveryManager::classify("file_read", "the file is empty"),
            ErrorPattern::EmptyPrecondition
        );
        assert_eq!(
            RecoveryManager::classify("file_edit", "expected type string"),
            ErrorPattern::TypeMismatch
        );
        assert_eq!(
            RecoveryManager::classify("shell", "something odd happened"),
            ErrorPattern::Unknown
        );
    }

    #[test]
    fn not_found_suggests_alternatives() {
        let actions = manager().suggest("file_read", "file not found", 1);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].strategy, RecoveryStrategy::Alternative);
        assert!(actions[0].description.contains("List the directory"));
    }

    #[test]
    fn timeout_retries_until_attempts_spent() {
        let m = manager();

        let fresh = m.suggest("shell", "operation timed out", 1);
        assert_eq!(fresh[0].strategy, RecoveryStrategy::Retry);

        let spent = m.suggest("shell", "operation timed out", 3);
        assert!(spent.iter().all(|a| a.strategy != RecoveryStrategy::Retry));
        assert_eq!(spent[0].strategy, RecoveryStrategy::Alternative);
    }

    #[test]
    fn fatal_markers_short_circuit_to_abort() {
        let actions = manager().suggest("shell", "fatal: repository is corrupt", 1);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].strategy, RecoveryStrategy::Abort);

        assert!(RecoveryManager::should_abort("SyntaX Error on line 3"));
        assert!(RecoveryManager::should_abort("CRITICAL: disk full"));
        assert!(!RecoveryManager::should_abort("file not found"));
    }

    #[test]
    fn suggestions_format_numbered() {
        let actions = vec![
            RecoveryAction::new(RecoveryStrategy::Alternative, "Try another path"),
            RecoveryAction::new(RecoveryStrategy::Skip, "Move on"),
        ];
        let text = format_suggestions(&actions);
        assert_eq!(
            text,
            "Recovery options:\n1. [alternative] Try another path\n2. [skip] Move on"
        );
        assert_eq!(
            format_suggestions(&[]),
            "No specific recovery suggestions available."
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let m = manager();
        assert_eq!(m.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(m.backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(m.backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(m.backoff_delay(30), MAX_BACKOFF);
    }

    #[test]
    fn history_is_bounded() {
        let mut m = manager().with_max_history(5);
        for i in 0..8 {
            m.record(ErrorRecord::new(
                ErrorPattern::Unknown,
                "shell",
                format!("error {i}"),
                RecoveryStrategy::Skip,
                RecoveryOutcome::Skipped,
            ));
        }

        assert_eq!(m.history().len(), 5);
        assert_eq!(m.history()[0].message, "error 3");
        assert_eq!(m.recent(2)[0].message, "error 6");
        assert_eq!(m.stats().total_errors, 8);
    }

    #[test]
    fn stats_track_most_common() {
        let mut m = manager();
        for _ in 0..3 {
            m.record(ErrorRecord::new(
                ErrorPattern::Timeout,
                "shell",
                "timed out",
                RecoveryStrategy::Retry,
                RecoveryOutcome::Recovered,
            ));
        }
        m.record(ErrorRecord::new(
            ErrorPattern::NotFound,
            "file_read",
            "not found",
            RecoveryStrategy::Alternative,
            RecoveryOutcome::Suggested,
        ));

        assert_eq!(m.stats().most_common_capability(), Some("shell"));
        assert_eq!(m.stats().most_common_pattern(), Some("timeout"));
        assert_eq!(m.stats().by_pattern.get("not_found"), Some(&1));
    }

    #[test]
    fn unknown_pattern_offers_retry_then_skip() {
        let m = manager();
        let fresh = m.suggest("shell", "mysterious failure", 1);
        assert_eq!(fresh[0].strategy, RecoveryStrategy::Retry);

        let spent = m.suggest("shell", "mysterious failure", 5);
        assert_eq!(spent[0].strategy, RecoveryStrategy::Alternative);
        assert_eq!(spent[1].strategy, RecoveryStrategy::Skip);
    }
}
