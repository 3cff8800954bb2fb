//! GroundGate CLI entry point.
//!
//! Commands:
//! - `serve`: Start the HTTP gateway
//! - `status`: Show configured backends and admission limits
//! - `check-config`: Load and validate the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "groundgate",
    about = "GroundGate: evidence-aware LLM gateway",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $GROUNDGATE_CONFIG, then ~/.groundgate/config.toml)
    #[arg(short, long, global = true, env = "GROUNDGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configured backends, models and admission limits
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the configuration
    CheckConfig {
        /// Print a starter configuration instead
        #[arg(long)]
        print_default: bool,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config, port).await?,
        Commands::Status { json } => commands::status::run(config, json)?,
        Commands::CheckConfig { print_default } => {
            commands::check_config::run(config, print_default)?
        }
    }

    Ok(())
}
