//! Context window management.
//!
//! Sessions accumulate turns without bound; engine prompts cannot. The
//! window tracks which turns are still visible to the prompt builder
//! and, when the visible view exceeds the profile's token budget,
//! collapses the oldest contiguous run of non-summary turns into one
//! `Summary` turn. Session history itself is never rewritten — covered
//! turns stay in the session and are only excluded from future prompts.
//!
//! Compaction prefers an engine-written summary, falls back to a
//! deterministic extractive digest when the engine call fails, and
//! hard-truncates the oldest visible turns as a last resort.

use chrono::Utc;
use forgeloop_core::engine::{Engine, EngineMessage, EngineProfile, EngineRequest};
use forgeloop_core::error::EngineError;
use forgeloop_core::event::{CoreEvent, EventBus};
use forgeloop_core::token::estimate_turn_tokens;
use forgeloop_core::turn::{ConversationTurn, Role, Session};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Whether the visible view currently fits the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Visible turns fit within the token budget.
    Active,
    /// Visible turns exceed the budget; compaction is needed.
    OverBudget,
}

const SUMMARY_MAX_TOKENS: u32 = 512;
const SUMMARY_TEMPERATURE: f32 = 0.3;
/// Upper bound on compaction rounds per enforce call.
const MAX_COMPACTION_ROUNDS: usize = 8;
/// How many of the run's most recent turns the extractive digest keeps.
const DIGEST_TURNS: usize = 10;

const SUMMARIZER_PREAMBLE: &str = "Condense the following conversation excerpt into a short \
factual summary. Keep file paths, command names, decisions, and unresolved questions. \
Write plain prose, no headings.";

/// Tracks which session turns are visible to the prompt builder.
pub struct ContextWindow {
    retain_recent: usize,
    /// Turn IDs no longer rendered into prompts.
    excluded: HashSet<String>,
    /// Summary turn standing in for a covered run, keyed by the ID of
    /// the run's first turn.
    summaries: HashMap<String, ConversationTurn>,
}

impl ContextWindow {
    pub fn new(retain_recent: usize) -> Self {
        Self {
            retain_recent,
            excluded: HashSet::new(),
            summaries: HashMap::new(),
        }
    }

    /// The prompt-facing view: summaries substituted in place of the
    /// runs they cover, everything else in session order.
    pub fn visible_turns(&self, session: &Session) -> Vec<ConversationTurn> {
        let mut visible = Vec::new();
        for turn in &session.turns {
            if let Some(summary) = self.summaries.get(&turn.id) {
                visible.push(summary.clone());
            }
            if !self.excluded.contains(&turn.id) {
                visible.push(turn.clone());
            }
        }
        visible
    }

    /// Estimated tokens of the visible view.
    pub fn visible_tokens(&self, session: &Session) -> usize {
        self.visible_turns(session)
            .iter()
            .map(estimate_turn_tokens)
            .sum()
    }

    pub fn state(&self, session: &Session, budget_tokens: usize) -> WindowState {
        if self.visible_tokens(session) > budget_tokens {
            WindowState::OverBudget
        } else {
            WindowState::Active
        }
    }

    /// Compact until the visible view fits `profile.context_tokens`.
    ///
    /// Each round collapses the oldest contiguous run of non-summary
    /// turns outside the protected recent tail. Returns the resulting
    /// state; `OverBudget` means even hard truncation could not fit the
    /// protected tail into the budget.
    pub async fn enforce(
        &mut self,
        session: &Session,
        engine: &dyn Engine,
        profile: &EngineProfile,
        events: &EventBus,
    ) -> WindowState {
        let budget = profile.context_tokens;
        let mut rounds = 0;

        while self.visible_tokens(session) > budget {
            rounds += 1;
            if rounds > MAX_COMPACTION_ROUNDS {
                warn!("Window compaction round limit reached; hard-truncating");
                self.hard_truncate(session, budget);
                break;
            }

            let run = self.oldest_eligible_run(session);
            if run.is_empty() {
                self.hard_truncate(session, budget);
                break;
            }

            let digest = match self.summarize_run(&run, engine, profile).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Engine summarization failed; using extractive digest");
                    extractive_digest(&run)
                }
            };

            let first_id = run[0].id.clone();
            for turn in &run {
                self.excluded.insert(turn.id.clone());
            }
            self.summaries
                .insert(first_id, ConversationTurn::summary(digest));

            debug!(
                turns_collapsed = run.len(),
                visible_tokens = self.visible_tokens(session),
                budget,
                "Collapsed oldest conversation run into a summary"
            );
            events.publish(CoreEvent::WindowSummarized {
                session_id: session.id.to_string(),
                turns_collapsed: run.len(),
                timestamp: Utc::now(),
            });
        }

        self.state(session, budget)
    }

    /// The oldest contiguous run of non-summary visible turns, leaving
    /// the `retain_recent` most recent visible turns untouched.
    fn oldest_eligible_run(&self, session: &Session) -> Vec<ConversationTurn> {
        let visible = self.visible_turns(session);
        let eligible_len = visible.len().saturating_sub(self.retain_recent);

        let mut run = Vec::new();
        for turn in visible.into_iter().take(eligible_len) {
            if turn.is_summary() {
                if run.is_empty() {
                    continue;
                }
                break;
            }
            run.push(turn);
        }
        run
    }

    /// Drop oldest visible entries (summaries included) until the view
    /// fits, never touching the protected recent tail.
    fn hard_truncate(&mut self, session: &Session, budget_tokens: usize) {
        let mut dropped = 0usize;

        loop {
            let visible = self.visible_turns(session);
            if visible.len() <= self.retain_recent
                || visible.iter().map(estimate_turn_tokens).sum::<usize>() <= budget_tokens
            {
                break;
            }

            let oldest = visible[0].clone();
            if oldest.is_summary() {
                self.summaries.retain(|_, s| s.id != oldest.id);
            } else {
                self.excluded.insert(oldest.id);
            }
            dropped += 1;
        }

        if dropped > 0 {
            warn!(dropped, "Hard-truncated oldest turns to fit the context budget");
        }
    }

    async fn summarize_run(
        &self,
        run: &[ConversationTurn],
        engine: &dyn Engine,
        profile: &EngineProfile,
    ) -> Result<String, EngineError> {
        let transcript: String = run
            .iter()
            .map(|turn| {
                let label = match turn.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                    Role::Tool => "Tool results",
                    Role::Summary => "Summary",
                };
                format!("{label}: {}\n", turn.content)
            })
            .collect();

        let mut request = EngineRequest::from_profile(
            profile,
            vec![
                EngineMessage::system(SUMMARIZER_PREAMBLE),
                EngineMessage::user(transcript),
            ],
        );
        request.max_tokens = Some(SUMMARY_MAX_TOKENS);
        request.temperature = SUMMARY_TEMPERATURE;

        let response = engine.complete(request).await?;
        let summary = response.content.trim().to_string();
        if summary.is_empty() {
            return Err(EngineError::StreamInterrupted(
                "empty summarization response".into(),
            ));
        }
        Ok(summary)
    }
}

/// Deterministic digest of a run, used when the engine cannot help.
fn extractive_digest(run: &[ConversationTurn]) -> String {
    let mut lines = vec!["Previous conversation:".to_string()];

    let skip = run.len().saturating_sub(DIGEST_TURNS);
    for turn in run.iter().skip(skip) {
        match turn.role {
            Role::User => lines.push(format!("- User requested: {}", head(&turn.content, 100))),
            Role::Assistant => lines.push(format!("- Assistant: {}", head(&turn.content, 100))),
            Role::Tool => {
                if turn.invocation_results.is_empty() {
                    lines.push(format!("- Tool results: {}", head(&turn.content, 100)));
                } else {
                    let mut names: Vec<&str> = Vec::new();
                    for result in &turn.invocation_results {
                        if !names.contains(&result.capability_name.as_str()) {
                            names.push(&result.capability_name);
                        }
                    }
                    lines.push(format!("- Assistant used tools: {}", names.join(", ")));
                }
            }
            Role::Summary => {}
        }
    }

    lines.join("\n")
}

fn head(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}
