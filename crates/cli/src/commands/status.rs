//! `groundgate status`: Show configured backends and admission limits.

use groundgate_config::{GatewayConfig, api_key_var};
use serde_json::json;
use std::path::Path;

pub fn run(config_path: Option<&Path>, as_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary(&config))?);
        return Ok(());
    }

    let a = &config.admission;
    println!("GroundGate Status");
    println!("=================");
    println!("  Config dir:   {}", GatewayConfig::config_dir().display());
    println!("  Server:       {}:{}", config.server.host, config.server.port);
    println!("  Window:       {}s", a.window_secs);
    println!("  Slots:        {} per backend", a.concurrency_slots);
    println!(
        "  Circuit:      opens after {} errors, cools down {}s",
        a.circuit.threshold, a.circuit.cooldown_secs
    );
    println!("  Retries:      up to {} attempts", a.retry.max_attempts);
    println!(
        "  Telemetry:    {}",
        if config.telemetry.enabled { config.telemetry.sink.as_str() } else { "disabled" }
    );

    if config.backends.is_empty() {
        println!("\n  No backends configured");
        return Ok(());
    }
    println!("\n  Backends:");
    for (name, backend) in &config.backends {
        let key = if backend.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            "key set"
        } else {
            "no key"
        };
        println!(
            "    {name:<12} {:<18} {:>9} tokens/window  {key}",
            backend.kind.to_string(),
            config.tokens_per_window(name)
        );
        println!("    {:<12} models: {}", "", backend.models.join(", "));
    }

    Ok(())
}

fn summary(config: &GatewayConfig) -> serde_json::Value {
    let backends: Vec<_> = config
        .backends
        .iter()
        .map(|(name, b)| {
            json!({
                "name": name,
                "kind": b.kind,
                "models": b.models,
                "tokens_per_window": config.tokens_per_window(name),
                "api_key_set": b.api_key.as_deref().is_some_and(|k| !k.is_empty()),
                "api_key_var": api_key_var(name),
            })
        })
        .collect();
    json!({
        "server": { "host": config.server.host, "port": config.server.port },
        "admission": config.admission,
        "backends": backends,
    })
}
