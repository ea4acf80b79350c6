//! Config command - show the effective configuration.

use anyhow::Result;
use kubetunnel_core::{ConfigStore, EngineConfig};

pub fn show(store: &ConfigStore, config: &EngineConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("Config file: {}", store.config_path().display());
    match &config.kubectl_path {
        Some(path) => println!("kubectl:     {}", path.display()),
        None => println!("kubectl:     (auto-detected)"),
    }
    if !config.kubectl_args.is_empty() {
        println!("kubectl args: {}", config.kubectl_args.join(" "));
    }
    println!("Connect timeout: {} ms", config.connect_timeout_ms);
    println!(
        "Retry: up to {} attempts, {}-{} ms backoff",
        config.retry.max_retries, config.retry.initial_delay_ms, config.retry.max_delay_ms
    );
    println!(
        "Health check: every {} ms, {} ms timeout",
        config.health_check.interval_ms, config.health_check.timeout_ms
    );
    Ok(())
}
