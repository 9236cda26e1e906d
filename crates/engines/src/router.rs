//! Engine router — one engine per routing tier.
//!
//! The orchestrator's task router picks a tier; this router resolves the
//! tier to a concrete backend. Unknown tiers fall back to the default.

use crate::http::HttpEngine;
use forgeloop_core::engine::Engine;
use std::collections::HashMap;
use std::sync::Arc;

/// Routes completion requests to the engine for a tier.
pub struct EngineRouter {
    engines: HashMap<String, Arc<dyn Engine>>,
    default_tier: String,
}

impl EngineRouter {
    /// Create a new router with a default tier.
    pub fn new(default_tier: impl Into<String>) -> Self {
        Self {
            engines: HashMap::new(),
            default_tier: default_tier.into(),
        }
    }

    /// Register an engine for a tier.
    pub fn register(&mut self, tier: impl Into<String>, engine: Arc<dyn Engine>) {
        self.engines.insert(tier.into(), engine);
    }

    /// Get the default tier's engine.
    pub fn default(&self) -> Option<Arc<dyn Engine>> {
        self.engines.get(&self.default_tier).cloned()
    }

    /// Get a specific tier's engine.
    pub fn get(&self, tier: &str) -> Option<Arc<dyn Engine>> {
        self.engines.get(tier).cloned()
    }

    /// Resolve a tier to an engine, falling back to the default tier.
    pub fn engine_for(&self, tier: &str) -> Option<Arc<dyn Engine>> {
        self.get(tier).or_else(|| self.default())
    }

    /// List all registered tier names.
    pub fn list(&self) -> Vec<&str> {
        self.engines.keys().map(|s| s.as_str()).collect()
    }
}

/// Build a tier router from configuration.
///
/// Every configured profile gets an HTTP engine against the shared base
/// URL with the profile's request timeout. Engines built here are not
/// wrapped in [`crate::RetryEngine`]: the orchestration loop retries transient
/// call failures itself, so a wrapped engine would retry twice over.
/// Wrap manually when driving an engine outside the loop.
pub fn build_from_config(config: &forgeloop_config::AppConfig) -> EngineRouter {
    let mut router = EngineRouter::new(&config.engine.default_tier);

    for (tier, profile) in &config.engine.profiles {
        let engine = HttpEngine::new(
            tier.clone(),
            &config.engine.base_url,
            config.api_key.clone(),
        )
        .with_timeout(profile.timeout_secs);

        router.register(tier.clone(), Arc::new(engine));
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let mut router = EngineRouter::new("medium");
        let engine = Arc::new(HttpEngine::ollama(None));
        router.register("medium", engine);

        assert!(router.get("medium").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
    }

    #[test]
    fn unknown_tier_falls_back_to_default() {
        let mut router = EngineRouter::new("medium");
        router.register("medium", Arc::new(HttpEngine::ollama(None)));

        let engine = router.engine_for("colossal");
        assert!(engine.is_some());
        assert_eq!(engine.unwrap().name(), "ollama");
    }

    #[test]
    fn build_from_default_config() {
        let config = forgeloop_config::AppConfig::default();
        let router = build_from_config(&config);

        assert!(router.default().is_some());
        for tier in ["low", "medium", "high"] {
            assert!(router.get(tier).is_some(), "missing engine for tier {tier}");
        }
    }
}
