//! `groundgate check-config`: Validate the configuration.

use groundgate_config::{GatewayConfig, api_key_var};
use std::path::Path;

pub fn run(config_path: Option<&Path>, print_default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if print_default {
        println!("{}", GatewayConfig::default_toml());
        return Ok(());
    }

    println!("Validating configuration...");

    match super::load_config(config_path) {
        Ok(config) => {
            println!("   Config parsed and validated");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Server:    {}:{}", config.server.host, config.server.port);
            println!("   Backends:  {}", config.backends.len());
            println!("   Window:    {}s", config.admission.window_secs);
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Problems that do not stop the gateway from starting.
fn warnings(config: &GatewayConfig) -> Vec<String> {
    let mut out = Vec::new();
    if config.backends.is_empty() {
        out.push("No backends configured".to_string());
    }
    for (name, backend) in &config.backends {
        if backend.api_key.as_deref().is_none_or(str::is_empty) {
            out.push(format!("backend '{name}' has no API key (set {})", api_key_var(name)));
        }
    }
    if config.server.host == "0.0.0.0" {
        out.push("Gateway bound to 0.0.0.0; it will accept remote connections".to_string());
    }
    if config.orchestrator.call_timeout_secs > config.server.request_timeout_secs {
        out.push(format!(
            "orchestrator.call_timeout_secs ({}) exceeds server.request_timeout_secs ({}); calls are capped at the latter",
            config.orchestrator.call_timeout_secs, config.server.request_timeout_secs
        ));
    }
    out
}
