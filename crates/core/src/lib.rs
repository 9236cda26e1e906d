//! # forgeloop Core
//!
//! Domain types, traits, and error definitions for the forgeloop
//! coding-assistant orchestrator. This crate has **zero framework
//! dependencies** — it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod capability;
pub mod engine;
pub mod error;
pub mod event;
pub mod recovery;
pub mod retrieval;
pub mod task;
pub mod token;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use capability::{
    Capability, CapabilityCategory, CapabilityOutput, CapabilityRegistry, InvocationRequest,
    InvocationResult, ResourceKey,
};
pub use engine::{Engine, EngineMessage, EngineProfile, EngineRequest, EngineResponse, StreamChunk};
pub use error::{Error, Result};
pub use event::{CoreEvent, EventBus};
pub use recovery::{ErrorPattern, ErrorRecord, RecoveryOutcome, RecoveryStrategy};
pub use retrieval::{
    KnowledgeEntry, KnowledgeKind, KnowledgeRepository, SessionStore, Snippet, VectorStore,
};
pub use task::{Task, TaskId, TaskStatus};
pub use turn::{ConversationTurn, Role, Session, SessionId, TurnMetrics, TurnResult};
