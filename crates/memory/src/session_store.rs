//! In-memory session persistence — useful for tests and single-process runs.

use async_trait::async_trait;
use forgeloop_core::error::MemoryError;
use forgeloop_core::retrieval::SessionStore;
use forgeloop_core::turn::{Session, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps sessions in a map; saving again overwrites the stored copy.
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session: &Session) -> Result<(), MemoryError> {
        self.sessions
            .write()
            .await
            .insert(session.id.0.clone(), session.clone());
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<Option<Session>, MemoryError> {
        Ok(self.sessions.read().await.get(&id.0).cloned())
    }
}
