//! Context retrieval ahead of each engine call.
//!
//! Two read-only sources are consulted concurrently: the vector store
//! (similarity over indexed workspace content) and the knowledge
//! repository (past solutions and patterns). Results are merged by
//! weighted score and trimmed to a byte budget. Retrieval is strictly
//! best-effort: a failing source contributes nothing and the turn
//! proceeds.

use forgeloop_core::retrieval::{KnowledgeRepository, Snippet, VectorStore};
use forgeloop_config::MemoryConfig;
use std::sync::Arc;
use tracing::{debug, warn};

/// Merges vector and knowledge search results under a byte budget.
pub struct ContextRetriever {
    vector: Option<Arc<dyn VectorStore>>,
    knowledge: Option<Arc<dyn KnowledgeRepository>>,
    vector_k: usize,
    knowledge_k: usize,
    vector_weight: f32,
    knowledge_weight: f32,
}

impl ContextRetriever {
    pub fn new(
        vector: Option<Arc<dyn VectorStore>>,
        knowledge: Option<Arc<dyn KnowledgeRepository>>,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            vector,
            knowledge,
            vector_k: config.vector_k,
            knowledge_k: config.knowledge_k,
            vector_weight: config.vector_weight,
            knowledge_weight: config.knowledge_weight,
        }
    }

    /// A retriever with no sources; always returns nothing.
    pub fn disabled() -> Self {
        Self {
            vector: None,
            knowledge: None,
            vector_k: 0,
            knowledge_k: 0,
            vector_weight: 1.0,
            knowledge_weight: 1.0,
        }
    }

    /// Query both sources, merge by weighted score, keep snippets until
    /// the byte budget runs out. Never fails; the worst case is empty.
    pub async fn retrieve(&self, query: &str, budget_bytes: usize) -> Vec<Snippet> {
        if budget_bytes == 0 {
            return Vec::new();
        }

        let (vector_results, knowledge_results) = tokio::join!(
            self.search_vector(query),
            self.search_knowledge(query),
        );

        let mut merged: Vec<Snippet> = Vec::new();
        merged.extend(vector_results.into_iter().map(|mut s| {
            s.score *= self.vector_weight;
            s
        }));
        merged.extend(knowledge_results.into_iter().map(|mut s| {
            s.score *= self.knowledge_weight;
            s
        }));

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut kept = Vec::new();
        let mut used = 0usize;
        for snippet in merged {
            let len = snippet.content.len();
            if used + len > budget_bytes {
                continue;
            }
            used += len;
            kept.push(snippet);
        }

        debug!(
            snippets = kept.len(),
            bytes = used,
            budget = budget_bytes,
            "Context retrieval complete"
        );

        kept
    }

    async fn search_vector(&self, query: &str) -> Vec<Snippet> {
        let Some(store) = &self.vector else {
            return Vec::new();
        };

        match store.search(query, self.vector_k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(source = store.name(), error = %e, "Vector search failed; skipping source");
                Vec::new()
            }
        }
    }

    async fn search_knowledge(&self, query: &str) -> Vec<Snippet> {
        let Some(repo) = &self.knowledge else {
            return Vec::new();
        };

        match repo.search(query, self.knowledge_k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(source = repo.name(), error = %e, "Knowledge search failed; skipping source");
                Vec::new()
            }
        }
    }
}

/// Render retrieved snippets as a prompt section.
pub fn format_snippets(snippets: &[Snippet]) -> String {
    if snippets.is_empty() {
        return String::new();
    }

    let mut out = String::from("Relevant context from the workspace and past sessions:\n");
    for snippet in snippets {
        out.push_str(&format!("\n[{}]\n{}\n", snippet.source, snippet.content));
    }
    out
}
