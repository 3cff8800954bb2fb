//! Backend registry: builds one client per configured backend and hands
//! them out by name.

use crate::anthropic::AnthropicClient;
use crate::gemini::GeminiClient;
use crate::openai::OpenAiClient;
use crate::openai_compat::OpenAiCompatClient;
use groundgate_config::{BackendConfig, GatewayConfig};
use groundgate_core::{BackendClient, BackendError, BackendKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Configured backends, keyed by name.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn BackendClient>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own name, replacing any previous one.
    pub fn register(&mut self, client: Arc<dyn BackendClient>) {
        self.backends.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendClient>> {
        self.backends.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Build the client for one backend entry.
pub fn build_client(name: &str, config: &BackendConfig) -> Result<Arc<dyn BackendClient>, BackendError> {
    if config.api_key.as_deref().is_none_or(str::is_empty) {
        warn!(backend = name, "No API key configured; calls will fail authentication");
    }
    let client: Arc<dyn BackendClient> = match config.kind {
        BackendKind::OpenAi => Arc::new(OpenAiClient::new(name, config)?),
        BackendKind::Anthropic => Arc::new(AnthropicClient::new(name, config)?),
        BackendKind::Gemini => Arc::new(GeminiClient::new(name, config)?),
        BackendKind::OpenAiCompatible => Arc::new(OpenAiCompatClient::new(name, config)?),
    };
    Ok(client)
}

/// Build every configured backend.
pub fn build_from_config(config: &GatewayConfig) -> Result<BackendRegistry, BackendError> {
    let mut registry = BackendRegistry::new();
    for (name, backend) in &config.backends {
        registry.register(build_client(name, backend)?);
        info!(
            backend = %name,
            kind = %backend.kind,
            models = backend.models.len(),
            "Backend registered"
        );
    }
    Ok(registry)
}

/// Vendor default endpoint for a backend family.
pub fn default_base_url(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::OpenAi => crate::openai::DEFAULT_BASE_URL,
        BackendKind::Anthropic => crate::anthropic::DEFAULT_BASE_URL,
        BackendKind::Gemini => crate::gemini::DEFAULT_BASE_URL,
        BackendKind::OpenAiCompatible => crate::openai_compat::DEFAULT_BASE_URL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        for (name, kind) in [
            ("openai", BackendKind::OpenAi),
            ("claude", BackendKind::Anthropic),
            ("gemini", BackendKind::Gemini),
            ("perplexity", BackendKind::OpenAiCompatible),
        ] {
            let mut b = BackendConfig::new(kind, ["m"]);
            b.api_key = Some("sk-test".into());
            config.backends.insert(name.into(), b);
        }
        config
    }

    #[test]
    fn builds_one_client_per_backend_with_matching_kind() {
        let registry = build_from_config(&config()).unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.names(), vec!["claude", "gemini", "openai", "perplexity"]);
        assert_eq!(registry.get("claude").unwrap().kind(), BackendKind::Anthropic);
        assert_eq!(registry.get("perplexity").unwrap().api_surface(), "openai_compatible.chat_completions");
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn supports_required_follows_config() {
        let mut config = config();
        if let Some(b) = config.backends.get_mut("openai") {
            b.supports_required_tools = true;
        }
        let registry = build_from_config(&config).unwrap();
        assert!(registry.get("openai").unwrap().supports_required_tools());
        assert!(!registry.get("gemini").unwrap().supports_required_tools());
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url(BackendKind::OpenAi).contains("api.openai.com"));
        assert!(default_base_url(BackendKind::Anthropic).contains("anthropic.com"));
        assert!(default_base_url(BackendKind::Gemini).contains("generativelanguage"));
    }

    #[test]
    fn empty_config_builds_empty_registry() {
        assert!(build_from_config(&GatewayConfig::default()).unwrap().is_empty());
    }
}
