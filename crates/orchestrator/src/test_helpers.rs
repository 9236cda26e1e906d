//! Shared test helpers for orchestrator tests.

use forgeloop_core::engine::{Engine, EngineRequest, EngineResponse, Usage};
use forgeloop_core::error::EngineError;
use std::sync::Mutex;

/// A scripted engine that returns a sequence of canned responses.
///
/// Each call to `complete` returns the next response in the queue.
/// Panics if more calls are made than responses provided.
pub struct ScriptedEngine {
    responses: Mutex<Vec<EngineResponse>>,
    call_count: Mutex<usize>,
}

impl ScriptedEngine {
    pub fn new(responses: Vec<EngineResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
        }
    }

    /// An engine that returns a single plain-text answer.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![text_response(text)])
    }

    /// An engine that first requests invocations, then answers.
    pub fn invoke_then_answer(invocations: &[(&str, serde_json::Value)], answer: &str) -> Self {
        Self::new(vec![invoke_response(invocations, ""), text_response(answer)])
    }

    #[allow(dead_code)]
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Engine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "ScriptedEngine: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        let response = responses[*count].clone();
        *count += 1;
        Ok(response)
    }
}

/// A plain-text response with no invocation tags.
pub fn text_response(text: &str) -> EngineResponse {
    EngineResponse {
        content: text.to_string(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "scripted-model".into(),
    }
}

/// A response whose content carries invocation tags, preceded by an
/// optional thought.
pub fn invoke_response(invocations: &[(&str, serde_json::Value)], thought: &str) -> EngineResponse {
    let mut content = String::new();
    if !thought.is_empty() {
        content.push_str(thought);
        content.push('\n');
    }
    for (name, params) in invocations {
        content.push_str(&format!("<invoke name=\"{name}\">\n"));
        if let Some(object) = params.as_object() {
            for (key, value) in object {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                content.push_str(&format!("<param name=\"{key}\">{rendered}</param>\n"));
            }
        }
        content.push_str("</invoke>\n");
    }
    text_response(&content)
}
