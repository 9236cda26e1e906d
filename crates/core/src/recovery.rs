//! Failure-recovery domain types.
//!
//! The recovery manager (in the orchestrator crate) classifies a failed
//! invocation's error text into an [`ErrorPattern`], selects a
//! [`RecoveryStrategy`], and appends an [`ErrorRecord`] to its bounded
//! history. The records themselves live here so results and sessions can
//! carry them without depending on the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recognized failure pattern, matched in priority order over the
/// error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPattern {
    /// Target file or resource does not exist.
    NotFound,
    /// Path rejected by the sandbox policy.
    PathNotAllowed,
    /// Operating system denied access.
    PermissionDenied,
    /// Version-control operation failed.
    GitError,
    /// A search legitimately found nothing.
    SearchNoResults,
    /// The invocation ran out of time.
    Timeout,
    /// A precondition (e.g. the target file) is empty or missing content.
    EmptyPrecondition,
    /// Parameters had the wrong shape or type.
    TypeMismatch,
    /// Nothing matched.
    Unknown,
}

impl ErrorPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PathNotAllowed => "path_not_allowed",
            Self::PermissionDenied => "permission_denied",
            Self::GitError => "git_error",
            Self::SearchNoResults => "search_no_results",
            Self::Timeout => "timeout",
            Self::EmptyPrecondition => "empty_precondition",
            Self::TypeMismatch => "type_mismatch",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The remediation chosen for a failed invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    /// Re-issue the same request with backoff.
    Retry,
    /// Establish the missing precondition, then retry once.
    Fallback,
    /// Suggest a different capability likely to make progress.
    Alternative,
    /// Drop this invocation and continue the turn.
    Skip,
    /// Give up on this invocation (and the task, if it was critical).
    Abort,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Fallback => "fallback",
            Self::Alternative => "alternative",
            Self::Skip => "skip",
            Self::Abort => "abort",
        }
    }
}

impl std::fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a recovery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The strategy was applied and the invocation now succeeds.
    Recovered,
    /// Suggestions were attached; the engine decides the next move.
    Suggested,
    /// The invocation was skipped.
    Skipped,
    /// The invocation (or task) was aborted.
    Aborted,
}

/// One failure and how it was handled. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The pattern the message matched.
    pub pattern: ErrorPattern,

    /// Which capability failed.
    pub capability_name: String,

    /// The original error message.
    pub message: String,

    /// The strategy that was selected.
    pub strategy: RecoveryStrategy,

    /// How it ended.
    pub outcome: RecoveryOutcome,

    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        pattern: ErrorPattern,
        capability_name: impl Into<String>,
        message: impl Into<String>,
        strategy: RecoveryStrategy,
        outcome: RecoveryOutcome,
    ) -> Self {
        Self {
            pattern,
            capability_name: capability_name.into(),
            message: message.into(),
            strategy,
            outcome,
            timestamp: Utc::now(),
        }
    }
}
