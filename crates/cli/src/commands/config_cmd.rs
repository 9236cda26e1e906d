//! `forgeloop config` — configuration management commands.

use anyhow::Context;
use forgeloop_config::AppConfig;

pub async fn init() -> anyhow::Result<()> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("forgeloop — configuration setup");
    println!("===============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Cannot create {}", config_dir.display()))?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run `forgeloop config init`.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())
            .with_context(|| format!("Cannot write {}", config_path.display()))?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Point [engine] at your endpoint (local Ollama works out of the box)");
        println!("   2. For remote endpoints, set FORGELOOP_API_KEY or add api_key");
        println!("   3. Run: forgeloop chat\n");
    }

    Ok(())
}

pub async fn show() -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    // The resolved key must never reach stdout.
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".to_string());
    }
    let rendered = toml::to_string_pretty(&config)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use forgeloop_config::AppConfig;

    #[test]
    fn config_path_is_under_the_config_dir() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn default_config_renders_as_toml() {
        let rendered = AppConfig::default_toml();
        assert!(rendered.contains("[engine]"));
        assert!(rendered.contains("[orchestrator]"));
    }
}
