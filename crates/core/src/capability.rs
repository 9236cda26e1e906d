//! Capability trait and registry.
//!
//! A capability is a named unit of external action (file access, search,
//! version control, shell) that the orchestrator can invoke on behalf of
//! the reasoning engine. Capabilities are registered at startup and
//! resolved by name through the registry — never through open-ended
//! reflection.
//!
//! Besides `invoke`, every capability declares static metadata the
//! orchestrator relies on:
//! - `is_read_only` — gates operation-cache eligibility
//! - `conflict_key` — resource identity for write-conflict exclusion
//! - `category` — selects the verification strategy

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CapabilityError;
use crate::recovery::ErrorRecord;

/// Identity of a resource an invocation would mutate.
///
/// Two write invocations with equal keys must never run concurrently.
/// For file capabilities this is the target path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey(pub String);

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verification category of a capability.
///
/// The verifier dispatches on category rather than on the specific
/// capability so new capabilities slot into an existing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityCategory {
    /// Produces content that should be non-empty (file reads, listings).
    Read,
    /// Mutates a target whose post-state can be checked.
    Write,
    /// May legitimately return zero results.
    Search,
    /// No independent check is feasible — the capability's own success
    /// flag is accepted (shell, version control).
    Trust,
}

/// A single executable capability.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique capability name (registry key).
    fn name(&self) -> &str;

    /// Human-readable description shown to the reasoning engine.
    fn description(&self) -> &str;

    /// JSON schema describing the parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether invocations are side-effect-free and cache-eligible.
    fn is_read_only(&self) -> bool;

    /// Verification category.
    fn category(&self) -> CapabilityCategory;

    /// The resource this invocation would mutate, when statically
    /// knowable from the parameters. `None` for a write capability means
    /// the target is ambiguous and the dispatcher must serialize it.
    fn conflict_key(&self, params: &serde_json::Value) -> Option<ResourceKey> {
        let _ = params;
        None
    }

    /// Execute the capability.
    async fn invoke(&self, params: serde_json::Value) -> Result<CapabilityOutput, CapabilityError>;
}

/// Raw output of a capability invocation, before verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityOutput {
    /// Whether the capability considers the invocation successful.
    pub success: bool,

    /// Text output fed back to the reasoning engine.
    pub output: String,

    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl CapabilityOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            data: None,
        }
    }
}

/// One request to execute a capability. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Registry name of the capability.
    pub capability_name: String,

    /// Parameters as a JSON object.
    pub parameters: serde_json::Value,

    /// The turn whose engine response produced this request.
    pub origin_turn_id: String,
}

impl InvocationRequest {
    pub fn new(
        capability_name: impl Into<String>,
        parameters: serde_json::Value,
        origin_turn_id: impl Into<String>,
    ) -> Self {
        Self {
            capability_name: capability_name.into(),
            parameters,
            origin_turn_id: origin_turn_id.into(),
        }
    }

    /// Canonical signature of this request: capability name plus the
    /// parameters with keys sorted. Equal signatures mean "the same
    /// operation" for caching and repetition detection.
    pub fn signature(&self) -> String {
        format!(
            "{}:{}",
            self.capability_name,
            canonical_json(&self.parameters)
        )
    }
}

/// Render a JSON value with object keys sorted, so logically equal
/// parameter maps produce byte-equal strings.
pub fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let key = serde_json::Value::String(k.clone());
                    format!("{}:{}", key, canonical_json(&map[k]))
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// Outcome of one invocation after the full pipeline (cache → dispatch →
/// verify → recover). Produced exactly once per request; cache hits
/// synthesize one without re-executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Which capability produced this result.
    pub capability_name: String,

    /// Whether the invocation succeeded (after any recovery).
    pub success: bool,

    /// Text output fed back to the reasoning engine.
    pub output: String,

    /// Whether the verifier confirmed the result.
    pub verified: bool,

    /// Verifier notes and suggestions, surfaced to the engine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_notes: Vec<String>,

    /// Failure record, when the invocation ultimately failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,

    /// Wall-clock execution time.
    pub duration_ms: u64,

    /// Whether this result was served from the operation cache.
    #[serde(default)]
    pub cache_hit: bool,
}

impl InvocationResult {
    /// Build a result straight from a capability output, before
    /// verification annotates it.
    pub fn from_output(
        capability_name: impl Into<String>,
        output: CapabilityOutput,
        duration_ms: u64,
    ) -> Self {
        Self {
            capability_name: capability_name.into(),
            success: output.success,
            output: output.output,
            verified: false,
            verification_notes: Vec::new(),
            error: None,
            duration_ms,
            cache_hit: false,
        }
    }

    /// Build a failed result from a capability error.
    pub fn from_error(
        capability_name: impl Into<String>,
        error: &CapabilityError,
        duration_ms: u64,
    ) -> Self {
        Self {
            capability_name: capability_name.into(),
            success: false,
            output: format!("Error: {error}"),
            verified: false,
            verification_notes: Vec::new(),
            error: None,
            duration_ms,
            cache_hit: false,
        }
    }
}

/// Definition of a capability as presented to the reasoning engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub read_only: bool,
}

/// Registry mapping capability names to implementations.
///
/// Built once at startup; lookups go through the map only.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Register a capability. Replaces any existing one with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        self.capabilities
            .insert(capability.name().to_string(), capability);
    }

    /// Look up a capability by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// All registered capability names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for prompt construction, sorted by name.
    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        let mut defs: Vec<CapabilityDefinition> = self
            .capabilities
            .values()
            .map(|c| CapabilityDefinition {
                name: c.name().to_string(),
                description: c.description().to_string(),
                parameters: c.parameters_schema(),
                read_only: c.is_read_only(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Check a request's parameters against the declared schema's
    /// `required` list. Extra parameters are tolerated.
    pub fn validate_parameters(&self, request: &InvocationRequest) -> Result<(), CapabilityError> {
        let capability = self
            .get(&request.capability_name)
            .ok_or_else(|| CapabilityError::NotFound(request.capability_name.clone()))?;

        let schema = capability.parameters_schema();
        let required = schema["required"].as_array().cloned().unwrap_or_default();

        let params = request.parameters.as_object().ok_or_else(|| {
            CapabilityError::InvalidParameters("parameters must be an object".into())
        })?;

        for field in required {
            if let Some(name) = field.as_str()
                && !params.contains_key(name)
            {
                return Err(CapabilityError::InvalidParameters(format!(
                    "{} requires parameter '{}'",
                    request.capability_name, name
                )));
            }
        }

        Ok(())
    }

    /// Validate and execute a request.
    pub async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let capability = self
            .get(&request.capability_name)
            .ok_or_else(|| CapabilityError::NotFound(request.capability_name.clone()))?;

        self.validate_parameters(request)?;

        capability.invoke(request.parameters.clone()).await
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
