//! Retrieval and persistence traits.
//!
//! The context retriever consults two read-only sources: a vector store
//! (semantic similarity over indexed code) and a knowledge repository
//! (tagged past solutions and patterns). Both are defined as traits here;
//! implementations live in the memory crate. Retrieval is best-effort —
//! a failing source degrades to contributing nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::turn::{Session, SessionId};

/// A retrieved piece of context, scored by relevance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    /// Where this came from ("vector", "knowledge", a file path, …).
    pub source: String,

    /// The text itself.
    pub content: String,

    /// Relevance score, higher is better. Comparable across sources.
    pub score: f32,
}

impl Snippet {
    pub fn new(source: impl Into<String>, content: impl Into<String>, score: f32) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            score,
        }
    }
}

/// Kind of knowledge entry, used to weight search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    /// A past request that was solved, and how.
    Solution,
    /// A recurring code or workflow pattern.
    Pattern,
    /// Anything else worth keeping.
    Note,
}

/// An entry in the knowledge repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// Unique ID; empty on insert, assigned by the repository.
    #[serde(default)]
    pub id: String,

    /// What kind of knowledge this is.
    pub kind: KnowledgeKind,

    /// The content.
    pub content: String,

    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// The session this was learned from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_session: Option<String>,

    /// When this was recorded.
    pub created_at: DateTime<Utc>,
}

impl KnowledgeEntry {
    pub fn new(kind: KnowledgeKind, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            kind,
            content: content.into(),
            tags: Vec::new(),
            source_session: None,
            created_at: Utc::now(),
        }
    }
}

/// Semantic similarity search over indexed content.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name.
    fn name(&self) -> &str;

    /// Index a document under the given ID (replaces any previous one).
    async fn index(&self, id: &str, content: &str) -> Result<(), MemoryError>;

    /// Return up to `k` snippets most similar to the query, best first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, MemoryError>;
}

/// Text search over accumulated solutions and patterns.
#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// Backend name.
    fn name(&self) -> &str;

    /// Store an entry, returning its assigned ID.
    async fn record(&self, entry: KnowledgeEntry) -> Result<String, MemoryError>;

    /// Return up to `limit` snippets relevant to the query, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Snippet>, MemoryError>;
}

/// Session persistence, called at turn boundaries only.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist the session.
    async fn save(&self, session: &Session) -> Result<(), MemoryError>;

    /// Load a session by ID; `None` if unknown.
    async fn load(&self, id: &SessionId) -> Result<Option<Session>, MemoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_kind_serializes_lowercase() {
        let json = serde_json::to_string(&KnowledgeKind::Solution).unwrap();
        assert_eq!(json, r#""solution""#);
    }

    #[test]
    fn snippet_construction() {
        let s = Snippet::new("vector", "fn main() {}", 0.92);
        assert_eq!(s.source, "vector");
        assert!((s.score - 0.92).abs() < f32::EPSILON);
    }
}
