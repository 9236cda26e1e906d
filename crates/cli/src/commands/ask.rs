//! `forgeloop ask` — one-shot request, answer on stdout.

use anyhow::Context;
use forgeloop_config::AppConfig;
use forgeloop_core::task::TaskStatus;
use forgeloop_core::turn::Session;

pub async fn run(prompt: &str) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    config.validate().context("Invalid configuration")?;
    super::require_credentials(&config)?;

    let mut orchestrator = super::build_orchestrator(&config)?;
    let mut session = Session::new();

    eprint!("  Thinking...");
    let result = orchestrator.handle_turn(&mut session, prompt).await?;
    eprint!("\r              \r");

    println!("{}", result.final_text);

    if result.task_state == Some(TaskStatus::Failed) {
        anyhow::bail!("Task failed; see the answer above for details.");
    }
    Ok(())
}
