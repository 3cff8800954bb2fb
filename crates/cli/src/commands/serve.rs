//! `groundgate serve`: Start the HTTP API server.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("GroundGate Gateway");
    println!("   Listening: {}:{}", config.server.host, config.server.port);
    println!(
        "   Backends:  {}",
        config.backends.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    if config.backends.is_empty() {
        tracing::warn!("No backends configured; every call will fail with UNKNOWN_BACKEND");
    }

    groundgate_gateway::start(config).await?;

    Ok(())
}
