//! Session and conversation-turn domain types.
//!
//! These are the value objects that flow through one user turn:
//! user message → orchestration loop → engine calls and invocations →
//! folded results → final answer. Turns are immutable once appended;
//! the window manager only excludes older turns from future prompts by
//! inserting synthetic `Summary` turns — it never rewrites history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::InvocationResult;
use crate::task::{Task, TaskStatus};

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user.
    User,
    /// The reasoning engine's reply.
    Assistant,
    /// Folded capability-invocation results.
    Tool,
    /// A synthetic digest of older turns, produced by the window manager.
    Summary,
}

/// A single turn in a session. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Unique turn ID.
    pub id: String,

    /// Who produced this turn.
    pub role: Role,

    /// The text content.
    pub content: String,

    /// Invocation results folded into this turn (Tool turns only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocation_results: Vec<InvocationResult>,

    /// Timestamp.
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            invocation_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool turn carrying folded invocation results.
    pub fn tool(content: impl Into<String>, results: Vec<InvocationResult>) -> Self {
        let mut turn = Self::new(Role::Tool, content);
        turn.invocation_results = results;
        turn
    }

    /// Create a summary turn covering older history.
    pub fn summary(content: impl Into<String>) -> Self {
        Self::new(Role::Summary, content)
    }

    /// Whether this turn is a window-manager digest.
    pub fn is_summary(&self) -> bool {
        self.role == Role::Summary
    }
}

/// Aggregate counters for one turn (or, accumulated, for a session).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetrics {
    /// Loop iterations used.
    pub iterations: u32,
    /// Reasoning-engine calls made (includes retries).
    pub engine_calls: u32,
    /// Capability invocations processed.
    pub invocations: u32,
    /// Operation-cache hits.
    pub cache_hits: u64,
    /// Operation-cache misses.
    pub cache_misses: u64,
    /// Parallel batches the dispatcher formed.
    pub parallel_batches: u64,
    /// Sum of individual durations minus wall-clock time, across batches.
    pub time_saved_ms: u64,
    /// Verifier outcomes.
    pub verifications_passed: u64,
    pub verifications_failed: u64,
    pub verifications_skipped: u64,
    /// Failures the recovery manager turned into successes.
    pub recovered_errors: u64,
    /// Wall-clock duration of the whole turn.
    pub total_duration_ms: u64,
}

impl TurnMetrics {
    /// Fold another metrics block into this one (session accumulation).
    pub fn absorb(&mut self, other: &TurnMetrics) {
        self.iterations += other.iterations;
        self.engine_calls += other.engine_calls;
        self.invocations += other.invocations;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
        self.parallel_batches += other.parallel_batches;
        self.time_saved_ms += other.time_saved_ms;
        self.verifications_passed += other.verifications_passed;
        self.verifications_failed += other.verifications_failed;
        self.verifications_skipped += other.verifications_skipped;
        self.recovered_errors += other.recovered_errors;
        self.total_duration_ms += other.total_duration_ms;
    }

    /// Cache hit rate in [0, 1]; 0 when nothing was cacheable.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// What `handle_turn` returns to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    /// The final answer — or a best-effort partial answer with an
    /// explanation when the turn could not complete normally.
    pub final_text: String,

    /// Every invocation processed during the turn, in request order.
    pub invocation_log: Vec<InvocationResult>,

    /// Counters for this turn.
    pub metrics: TurnMetrics,

    /// Status of the active task after the turn, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_state: Option<TaskStatus>,
}

/// A session: the ordered turn history plus per-session state.
///
/// The orchestration loop exclusively owns a session for the duration of
/// one turn; no two turns of the same session execute concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID.
    pub id: SessionId,

    /// Ordered turns, oldest first.
    pub turns: Vec<ConversationTurn>,

    /// Metrics accumulated across all turns of this session.
    #[serde(default)]
    pub metrics: TurnMetrics,

    /// The task currently being worked on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task: Option<Task>,

    /// When this session was created.
    pub created_at: DateTime<Utc>,

    /// When the last turn was appended.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            turns: Vec::new(),
            metrics: TurnMetrics::default(),
            active_task: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    /// Rough token estimate across all turns (4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns
            .iter()
            .map(|t| crate::token::estimate_turn_tokens(t))
            .sum()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
