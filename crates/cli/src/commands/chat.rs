//! `forgeloop chat` — interactive session in the current workspace.

use std::io::Write;

use anyhow::Context;
use forgeloop_config::AppConfig;
use forgeloop_core::turn::Session;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    config.validate().context("Invalid configuration")?;
    super::require_credentials(&config)?;

    let mut orchestrator = super::build_orchestrator(&config)?;
    let mut session = Session::new();

    let tier = &config.engine.default_tier;
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║         forgeloop — Interactive Mode         ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Endpoint:      {}", config.engine.base_url);
    println!(
        "  Model:         {} ({} tier)",
        config.profile_for(tier).model,
        tier
    );
    println!(
        "  Capabilities:  {}",
        orchestrator.capability_names().join(", ")
    );
    println!("  Session:       {}", session.id);
    println!();
    println!("  Type your request and press Enter.");
    println!("  Type 'exit' to quit. Ctrl+C during a turn cancels it.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(line) = line else { break };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        let cancel = orchestrator.cancel_handle();
        let outcome = {
            let turn = orchestrator.handle_turn(&mut session, input);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    result = &mut turn => break result,
                    _ = tokio::signal::ctrl_c() => {
                        cancel.cancel();
                        eprintln!();
                        eprintln!("  (cancelling — in-flight work will finish)");
                    }
                }
            }
        };

        match outcome {
            Ok(result) => {
                println!();
                for line in result.final_text.lines() {
                    println!("  Assistant > {line}");
                }
                println!();
                let m = &result.metrics;
                eprintln!(
                    "  [{} iteration(s), {} invocation(s), {} cache hit(s), {:.1}s]",
                    m.iterations,
                    m.invocations,
                    m.cache_hits,
                    m.total_duration_ms as f64 / 1000.0
                );
                println!();
            }
            Err(e) => {
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye! 👋");
    println!();

    Ok(())
}
