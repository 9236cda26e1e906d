//! Domain event system — decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens during a turn.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoreEvent {
    /// A user turn began processing.
    TurnStarted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The reasoning engine answered one iteration.
    EngineResponded {
        session_id: String,
        model: String,
        iteration: u32,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// An invocation finished the pipeline.
    InvocationCompleted {
        capability_name: String,
        success: bool,
        cache_hit: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The recovery manager handled a failure.
    RecoveryApplied {
        capability_name: String,
        pattern: String,
        strategy: String,
        timestamp: DateTime<Utc>,
    },

    /// The window manager collapsed older turns into a summary.
    WindowSummarized {
        session_id: String,
        turns_collapsed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A user turn finished.
    TurnCompleted {
        session_id: String,
        iterations: u32,
        invocations: u32,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for core events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Components
/// subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<CoreEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: CoreEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CoreEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
