//! Retrieval store implementations for forgeloop.
//!
//! Two read-only context sources back the retriever: a vector store over
//! indexed workspace content and a knowledge repository of past solutions
//! and patterns. Session persistence lives here too.

pub mod knowledge;
pub mod session_store;
pub mod vector;

pub use knowledge::InMemoryKnowledgeRepository;
pub use session_store::InMemorySessionStore;
pub use vector::{Embedder, HashEmbedder, InMemoryVectorStore, cosine_similarity};
