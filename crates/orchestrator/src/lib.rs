//! The orchestration core — the engine room of forgeloop.
//!
//! Each user turn runs a **classify → retrieve → prompt → engine →
//! dispatch → fold** cycle:
//!
//! 1. **Classify** the request into a task type and complexity tier
//! 2. **Retrieve** relevant snippets from workspace and session memory
//! 3. **Build the prompt** from the visible window plus retrieved context
//! 4. **Call the engine** on the tier's profile
//! 5. **If invocations**: dispatch them (cached, parallel, verified,
//!    recovered), fold results into the session, loop back to step 3
//! 6. **If plain text**: the turn is answered
//!
//! The cycle repeats until the engine answers without invocations, a
//! guard trips, or the iteration cap is reached.

pub mod cache;
pub mod dispatcher;
pub mod loop_guard;
pub mod loop_runner;
pub mod parse;
pub mod pipeline;
pub mod planner;
pub mod prompt;
pub mod recovery;
pub mod retriever;
pub mod router;
pub mod verifier;
pub mod window;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use cache::{CacheStats, OperationCache};
pub use dispatcher::{DispatchStats, ParallelDispatcher};
pub use loop_guard::{GuardVerdict, LoopGuard};
pub use loop_runner::{CancelHandle, Orchestrator};
pub use parse::{ParsedInvocation, parse_invocations, strip_invocations};
pub use pipeline::{InvocationPipeline, ProcessedBatch};
pub use planner::TaskPlanner;
pub use prompt::{BuiltPrompt, PromptInputs, build_messages};
pub use recovery::{RecoveryAction, RecoveryManager, RecoveryStats, format_suggestions};
pub use retriever::{ContextRetriever, format_snippets};
pub use router::{Classification, ClassifyContext, ComplexityTier, Router, TaskType};
pub use verifier::{Verification, VerificationStatus, Verifier};
pub use window::{ContextWindow, WindowState};
