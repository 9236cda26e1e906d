//! In-memory vector store over a pluggable embedder.
//!
//! Pure-Rust implementation: feature-hashing embeddings by default, cosine
//! similarity for ranking. Good enough for workspace-scale retrieval and
//! deterministic tests; swap the embedder for a real model when one is
//! available.

use async_trait::async_trait;
use forgeloop_core::error::MemoryError;
use forgeloop_core::retrieval::{Snippet, VectorStore};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Turns text into a fixed-size embedding.
pub trait Embedder: Send + Sync {
    fn dims(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// A deterministic feature-hashing embedder.
///
/// Tokens are hashed into a fixed number of buckets and the resulting
/// vector is L2-normalized. No model weights, no I/O, stable across runs.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a_64(token.as_bytes()) as usize) % self.dims;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-10 {
            for x in &mut vector {
                *x /= norm;
            }
        }

        vector
    }
}

/// FNV-1a, 64-bit. Bucket assignment must be stable across runs.
fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

struct IndexedDoc {
    id: String,
    content: String,
    embedding: Vec<f32>,
}

/// An in-memory vector store.
///
/// Indexing the same id again replaces the previous document.
pub struct InMemoryVectorStore {
    docs: Arc<RwLock<Vec<IndexedDoc>>>,
    embedder: Arc<dyn Embedder>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            docs: Arc::new(RwLock::new(Vec::new())),
            embedder,
        }
    }

    /// Construct with the default feature-hashing embedder.
    pub fn with_hash_embedder() -> Self {
        Self::new(Arc::new(HashEmbedder::default()))
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "in_memory_vector"
    }

    async fn index(&self, id: &str, content: &str) -> Result<(), MemoryError> {
        let embedding = self.embedder.embed(content);
        let mut docs = self.docs.write().await;
        docs.retain(|d| d.id != id);
        docs.push(IndexedDoc {
            id: id.to_string(),
            content: content.to_string(),
            embedding,
        });
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<Snippet>, MemoryError> {
        let query_embedding = self.embedder.embed(query);
        let docs = self.docs.read().await;

        let mut scored: Vec<(f32, Snippet)> = docs
            .iter()
            .filter_map(|doc| {
                let sim = cosine_similarity(&doc.embedding, &query_embedding);
                if sim > 0.0 {
                    Some((
                        sim,
                        Snippet::new(format!("vector:{}", doc.id), doc.content.clone(), sim),
                    ))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, s)| s).collect())
    }
}
