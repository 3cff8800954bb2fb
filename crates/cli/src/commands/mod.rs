//! Subcommand implementations.

pub mod check_config;
pub mod serve;
pub mod status;

use groundgate_config::{ConfigError, GatewayConfig};
use std::path::Path;

/// Load from `path` when given, otherwise from the default location.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    match path {
        Some(path) => GatewayConfig::load_with_env(path),
        None => GatewayConfig::load(),
    }
}
