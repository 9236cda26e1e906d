//! Token estimation heuristics.
//!
//! We don't ship a tokenizer; the standard rough heuristic of
//! ~4 characters per token is close enough for budget accounting.
//! Budgets leave headroom, so a small overestimate is harmless.

use crate::engine::EngineMessage;
use crate::turn::ConversationTurn;

/// Estimate token count for a text string.
///
/// Rounds up so short strings still cost at least one token.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

/// Estimate tokens for a conversation turn, including per-message
/// formatting overhead (role markers, separators).
pub fn estimate_turn_tokens(turn: &ConversationTurn) -> usize {
    estimate_tokens(&turn.content) + 4
}

/// Estimate tokens for an assembled engine message.
pub fn estimate_message_tokens(message: &EngineMessage) -> usize {
    estimate_tokens(&message.content) + 4
}
