//! Subcommand implementations.

pub mod ask;
pub mod chat;
pub mod config_cmd;

use std::sync::Arc;

use anyhow::Context;
use forgeloop_capabilities::default_registry;
use forgeloop_config::AppConfig;
use forgeloop_core::event::EventBus;
use forgeloop_engines::build_from_config;
use forgeloop_memory::InMemoryKnowledgeRepository;
use forgeloop_orchestrator::{ContextRetriever, Orchestrator};

/// Wire an orchestrator from config: tier engines, capabilities scoped
/// to the current directory, and an in-process knowledge repository
/// shared between retrieval and solution recording.
pub(crate) fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let workspace = std::env::current_dir().context("Cannot determine working directory")?;
    let registry = Arc::new(default_registry(&config.capabilities, &workspace));

    let engines = build_from_config(config);
    let engine = engines
        .engine_for(&config.engine.default_tier)
        .context("No engine configured for the default tier")?;

    let knowledge = Arc::new(InMemoryKnowledgeRepository::new());
    let retriever = ContextRetriever::new(None, Some(knowledge.clone()), &config.memory);

    let events = Arc::new(EventBus::default());
    Ok(Orchestrator::new(engine, registry, config, events)
        .with_retriever(retriever)
        .with_knowledge(knowledge))
}

/// Refuse to start against a remote endpoint without credentials.
/// Local endpoints (Ollama and friends) need none.
pub(crate) fn require_credentials(config: &AppConfig) -> anyhow::Result<()> {
    let local = config.engine.base_url.contains("localhost")
        || config.engine.base_url.contains("127.0.0.1");
    if config.has_api_key() || local {
        return Ok(());
    }

    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set the environment variable:");
    eprintln!("    export FORGELOOP_API_KEY='sk-...'");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!(
        "    {}",
        AppConfig::config_dir().join("config.toml").display()
    );
    eprintln!();
    anyhow::bail!("No API key found. See above for setup instructions.")
}
