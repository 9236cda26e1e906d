//! Engine trait — the abstraction over reasoning-engine backends.
//!
//! An Engine knows how to send an assembled prompt to a text-generation
//! service and return the response, either complete or as a stream of
//! chunks. The orchestration loop parses invocation requests out of the
//! returned text; the engine itself is a black box.
//!
//! Implementations: OpenAI-compatible HTTP endpoints, plus scripted
//! engines for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Role of a message on the engine wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineRole {
    System,
    User,
    Assistant,
}

/// One message in an engine request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineMessage {
    pub role: EngineRole,
    pub content: String,
}

impl EngineMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: EngineRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: EngineRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: EngineRole::Assistant,
            content: content.into(),
        }
    }
}

/// A profile bundling the latency/quality/cost trade-off for one
/// complexity tier. Selected by the router, immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineProfile {
    /// Profile name ("low", "medium", "high").
    pub name: String,

    /// Model identifier sent to the engine.
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Response token cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-call timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Prompt-side token budget for the window manager.
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_context_tokens() -> usize {
    8192
}

impl Default for EngineProfile {
    fn default() -> Self {
        Self {
            name: "medium".into(),
            model: "qwen2.5-coder:14b".into(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            context_tokens: default_context_tokens(),
        }
    }
}

/// A fully assembled engine request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRequest {
    /// The model to use.
    pub model: String,

    /// The prompt messages.
    pub messages: Vec<EngineMessage>,

    /// Temperature (0.0 = deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Whether to stream the response.
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl EngineRequest {
    /// Build a request from a profile and messages.
    pub fn from_profile(profile: &EngineProfile, messages: Vec<EngineMessage>) -> Self {
        Self {
            model: profile.model.clone(),
            messages,
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            stream: false,
            stop: Vec::new(),
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) engine response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    /// The generated text. Invocation requests, if any, are embedded as
    /// structured tags that the orchestrator parses out.
    pub content: String,

    /// Token usage statistics.
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested).
    pub model: String,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta.
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk.
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The reasoning-engine trait.
///
/// The orchestration loop calls `complete()` or `stream()` without
/// knowing which backend is wired in — pure polymorphism.
#[async_trait]
pub trait Engine: Send + Sync {
    /// A human-readable name for this engine backend.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: EngineRequest,
    ) -> std::result::Result<EngineResponse, EngineError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as
    /// a single chunk.
    async fn stream(
        &self,
        request: EngineRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, EngineError>>,
        EngineError,
    > {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.content),
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Health check — can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, EngineError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_from_profile() {
        let profile = EngineProfile {
            name: "deep".into(),
            model: "big-model".into(),
            temperature: 0.2,
            max_tokens: Some(4096),
            timeout_secs: 300,
            context_tokens: 16384,
        };
        let req = EngineRequest::from_profile(&profile, vec![EngineMessage::user("hi")]);
        assert_eq!(req.model, "big-model");
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(req.max_tokens, Some(4096));
        assert!(!req.stream);
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = EngineMessage::system("You are a coding assistant.");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"system""#));
    }

    #[tokio::test]
    async fn default_stream_wraps_complete() {
        struct OneShot;

        #[async_trait]
        impl Engine for OneShot {
            fn name(&self) -> &str {
                "one_shot"
            }

            async fn complete(
                &self,
                _request: EngineRequest,
            ) -> std::result::Result<EngineResponse, EngineError> {
                Ok(EngineResponse {
                    content: "hello".into(),
                    usage: None,
                    model: "one_shot".into(),
                })
            }
        }

        let engine = OneShot;
        let req = EngineRequest::from_profile(&EngineProfile::default(), vec![]);
        let mut rx = engine.stream(req).await.unwrap();

        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert!(chunk.done);
        assert!(rx.recv().await.is_none());
    }
}
