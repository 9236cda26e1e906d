//! Configuration loading, validation, and management for forgeloop.
//!
//! Loads configuration from `~/.forgeloop/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use forgeloop_core::EngineProfile;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.forgeloop/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the engine backend (unset is fine for local engines)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Opening system-prompt paragraph override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_preamble: Option<String>,

    /// Engine backend and per-tier profiles
    #[serde(default)]
    pub engine: EngineConfig,

    /// Turn loop, cache, dispatch, and recovery settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Retrieval and knowledge settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Capability sandbox settings
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("system_preamble", &self.system_preamble)
            .field("engine", &self.engine)
            .field("orchestrator", &self.orchestrator)
            .field("memory", &self.memory)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Engine backend settings and the tier → profile table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// OpenAI-compatible chat completions endpoint base
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Tier used when the router has nothing better to say
    #[serde(default = "default_tier")]
    pub default_tier: String,

    /// Transient-failure retries per engine call
    #[serde(default = "default_call_retries")]
    pub call_retries: u32,

    /// Base backoff between engine retries, in milliseconds
    #[serde(default = "default_engine_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Profiles keyed by tier name ("low", "medium", "high")
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, ProfileConfig>,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".into()
}
fn default_tier() -> String {
    "medium".into()
}
fn default_call_retries() -> u32 {
    2
}
fn default_engine_retry_base_ms() -> u64 {
    300
}

fn default_profiles() -> HashMap<String, ProfileConfig> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "low".to_string(),
        ProfileConfig {
            model: "qwen2.5-coder:7b".into(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            context_tokens: 8192,
        },
    );
    profiles.insert(
        "medium".to_string(),
        ProfileConfig {
            model: "qwen2.5-coder:14b".into(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            context_tokens: 16384,
        },
    );
    profiles.insert(
        "high".to_string(),
        ProfileConfig {
            model: "qwen2.5-coder:32b".into(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_deep_timeout_secs(),
            context_tokens: 16384,
        },
    );
    profiles
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_tier: default_tier(),
            call_retries: default_call_retries(),
            retry_base_ms: default_engine_retry_base_ms(),
            profiles: default_profiles(),
        }
    }
}

/// A single engine profile as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Model identifier sent to the backend
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Response token cap (backend default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Prompt-side token budget for the context window
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_deep_timeout_secs() -> u64 {
    300
}
fn default_context_tokens() -> usize {
    8192
}

impl ProfileConfig {
    /// Materialize this entry as a runtime [`EngineProfile`].
    pub fn to_profile(&self, name: &str) -> EngineProfile {
        EngineProfile {
            name: name.to_string(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout_secs: self.timeout_secs,
            context_tokens: self.context_tokens,
        }
    }
}

/// Settings for the turn loop and the invocation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on engine iterations per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Concurrent invocations per dispatch batch
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Per-invocation execution timeout, in seconds
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// Cache TTL for read-only results, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Cache entry cap before LRU eviction
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Per-capability TTL overrides, in seconds
    #[serde(default)]
    pub cache_ttl_overrides: HashMap<String, u64>,

    /// Retry budget per failed invocation
    #[serde(default = "default_invocation_retries")]
    pub max_invocation_retries: u32,

    /// Base backoff between invocation retries, in milliseconds
    #[serde(default = "default_recovery_base_ms")]
    pub retry_base_ms: u64,

    /// Recent turns the window manager never summarizes
    #[serde(default = "default_retain_recent")]
    pub retain_recent: usize,

    /// Byte budget for retrieved context merged into the prompt
    #[serde(default = "default_retrieval_budget_bytes")]
    pub retrieval_budget_bytes: usize,

    /// Repeated failures on one capability before the router escalates tier
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: usize,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_max_parallel() -> usize {
    4
}
fn default_invocation_timeout_secs() -> u64 {
    60
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_invocation_retries() -> u32 {
    3
}
fn default_recovery_base_ms() -> u64 {
    500
}
fn default_retain_recent() -> usize {
    4
}
fn default_retrieval_budget_bytes() -> usize {
    4096
}
fn default_escalation_threshold() -> usize {
    2
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_parallel: default_max_parallel(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_overrides: HashMap::new(),
            max_invocation_retries: default_invocation_retries(),
            retry_base_ms: default_recovery_base_ms(),
            retain_recent: default_retain_recent(),
            retrieval_budget_bytes: default_retrieval_budget_bytes(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

/// Settings for context retrieval and the knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Candidates pulled from the vector store per query
    #[serde(default = "default_vector_k")]
    pub vector_k: usize,

    /// Candidates pulled from the knowledge repository per query
    #[serde(default = "default_knowledge_k")]
    pub knowledge_k: usize,

    /// Relevance weight for vector-store snippets
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// Relevance weight for knowledge entries
    #[serde(default = "default_knowledge_weight")]
    pub knowledge_weight: f32,

    /// Record successful turn outcomes as reusable solutions
    #[serde(default = "default_true")]
    pub auto_record_solutions: bool,
}

fn default_vector_k() -> usize {
    5
}
fn default_knowledge_k() -> usize {
    5
}
fn default_vector_weight() -> f32 {
    0.6
}
fn default_knowledge_weight() -> f32 {
    0.4
}
fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            vector_k: default_vector_k(),
            knowledge_k: default_knowledge_k(),
            vector_weight: default_vector_weight(),
            knowledge_weight: default_knowledge_weight(),
            auto_record_solutions: true,
        }
    }
}

/// Sandbox limits applied to filesystem and shell capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    /// Restrict file access to the working directory
    #[serde(default = "default_true")]
    pub workspace_only: bool,

    /// Extra roots reachable when `workspace_only` is false
    #[serde(default)]
    pub allowed_roots: Vec<String>,

    /// Path prefixes always denied
    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,

    /// Commands the shell capability may run
    #[serde(default = "default_shell_allowlist")]
    pub shell_allowlist: Vec<String>,

    /// Shell command timeout, in seconds
    #[serde(default = "default_shell_timeout_secs")]
    pub shell_timeout_secs: u64,

    /// Truncation cap for capability output, in bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_forbidden_paths() -> Vec<String> {
    vec!["/etc".into(), "/sys".into(), "/proc".into(), "/dev".into()]
}

fn default_shell_allowlist() -> Vec<String> {
    vec![
        "git".into(),
        "cargo".into(),
        "ls".into(),
        "cat".into(),
        "grep".into(),
        "rg".into(),
        "python3".into(),
        "npm".into(),
    ]
}

fn default_shell_timeout_secs() -> u64 {
    60
}
fn default_max_output_bytes() -> usize {
    65536
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            workspace_only: true,
            allowed_roots: vec![],
            forbidden_paths: default_forbidden_paths(),
            shell_allowlist: default_shell_allowlist(),
            shell_timeout_secs: default_shell_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.forgeloop/config.toml).
    ///
    /// Also checks environment variables:
    /// - `FORGELOOP_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `FORGELOOP_BASE_URL` overrides `engine.base_url`
    /// - `FORGELOOP_MODEL` overrides the default tier's model
    /// - `FORGELOOP_TIER` overrides `engine.default_tier`
    pub fn load() -> Result<Self, ConfigError> {
        let config_dir = Self::config_dir();
        let config_path = config_dir.join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("FORGELOOP_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(base_url) = std::env::var("FORGELOOP_BASE_URL") {
            config.engine.base_url = base_url;
        }

        if let Ok(tier) = std::env::var("FORGELOOP_TIER") {
            config.engine.default_tier = tier;
        }

        if let Ok(model) = std::env::var("FORGELOOP_MODEL") {
            let tier = config.engine.default_tier.clone();
            if let Some(profile) = config.engine.profiles.get_mut(&tier) {
                profile.model = model;
            }
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".forgeloop")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, profile) in &self.engine.profiles {
            if profile.temperature < 0.0 || profile.temperature > 2.0 {
                return Err(ConfigError::ValidationError(format!(
                    "profile '{name}': temperature must be between 0.0 and 2.0"
                )));
            }
            if profile.context_tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "profile '{name}': context_tokens must be > 0"
                )));
            }
        }

        if !self.engine.profiles.contains_key(&self.engine.default_tier) {
            return Err(ConfigError::ValidationError(format!(
                "default_tier '{}' has no profile entry",
                self.engine.default_tier
            )));
        }

        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be >= 1".into(),
            ));
        }

        if self.orchestrator.max_parallel == 0 {
            return Err(ConfigError::ValidationError(
                "max_parallel must be >= 1".into(),
            ));
        }

        if self.orchestrator.retain_recent == 0 {
            return Err(ConfigError::ValidationError(
                "retain_recent must be >= 1".into(),
            ));
        }

        if self.orchestrator.cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "cache_capacity must be >= 1".into(),
            ));
        }

        if self.memory.vector_weight + self.memory.knowledge_weight <= 0.0 {
            return Err(ConfigError::ValidationError(
                "vector_weight + knowledge_weight must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve a routing tier name to a runtime engine profile.
    ///
    /// Unknown tiers fall back to the configured default tier, then to the
    /// built-in medium profile.
    pub fn profile_for(&self, tier: &str) -> EngineProfile {
        if let Some(profile) = self.engine.profiles.get(tier) {
            return profile.to_profile(tier);
        }
        let fallback = &self.engine.default_tier;
        match self.engine.profiles.get(fallback) {
            Some(profile) => profile.to_profile(fallback),
            None => EngineProfile::default(),
        }
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            system_preamble: None,
            engine: EngineConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            memory: MemoryConfig::default(),
            capabilities: CapabilitiesConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
