//! In-memory knowledge repository — past solutions and recurring patterns.
//!
//! Search is keyword overlap weighted by entry kind: a matching past
//! solution outranks a matching pattern, which outranks a plain note.
//! Ties break toward the most recently recorded entry.

use async_trait::async_trait;
use forgeloop_core::error::MemoryError;
use forgeloop_core::retrieval::{KnowledgeEntry, KnowledgeKind, KnowledgeRepository, Snippet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Relevance multiplier per entry kind.
fn kind_weight(kind: KnowledgeKind) -> f32 {
    match kind {
        KnowledgeKind::Solution => 3.0,
        KnowledgeKind::Pattern => 2.0,
        KnowledgeKind::Note => 1.0,
    }
}

fn kind_label(kind: KnowledgeKind) -> &'static str {
    match kind {
        KnowledgeKind::Solution => "solution",
        KnowledgeKind::Pattern => "pattern",
        KnowledgeKind::Note => "note",
    }
}

/// An in-memory knowledge repository backed by a Vec.
pub struct InMemoryKnowledgeRepository {
    entries: Arc<RwLock<Vec<KnowledgeEntry>>>,
}

impl InMemoryKnowledgeRepository {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for InMemoryKnowledgeRepository {
    fn default() -> Self {
        Self::new()
    }
}

/// Fraction of query tokens found in the entry's content or tags.
fn overlap_score(query_tokens: &[String], entry: &KnowledgeEntry) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }

    let content_lower = entry.content.to_lowercase();
    let matched = query_tokens
        .iter()
        .filter(|token| {
            content_lower.contains(token.as_str())
                || entry.tags.iter().any(|tag| tag.to_lowercase() == **token)
        })
        .count();

    matched as f32 / query_tokens.len() as f32
}

#[async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    fn name(&self) -> &str {
        "in_memory_knowledge"
    }

    async fn record(&self, mut entry: KnowledgeEntry) -> Result<String, MemoryError> {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        let id = entry.id.clone();

        debug!(
            kind = kind_label(entry.kind),
            id = %id,
            "Recording knowledge entry"
        );

        self.entries.write().await.push(entry);
        Ok(id)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Snippet>, MemoryError> {
        let query_tokens: Vec<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(String::from)
            .collect();

        let entries = self.entries.read().await;

        let mut scored: Vec<(f32, chrono::DateTime<chrono::Utc>, Snippet)> = entries
            .iter()
            .filter_map(|entry| {
                let score = overlap_score(&query_tokens, entry) * kind_weight(entry.kind);
                if score > 0.0 {
                    Some((
                        score,
                        entry.created_at,
                        Snippet::new(
                            format!("knowledge:{}", kind_label(entry.kind)),
                            entry.content.clone(),
                            score,
                        ),
                    ))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
        });
        scored.truncate(limit);

        Ok(scored.into_iter().map(|(_, _, s)| s).collect())
    }
}
