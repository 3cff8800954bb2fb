//! Per-backend model allow-lists.

use groundgate_config::GatewayConfig;
use groundgate_core::{Error, Result};
use std::collections::BTreeMap;

/// Which models each configured backend may serve.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    allowed: BTreeMap<String, Vec<String>>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let allowed = config
            .backends
            .iter()
            .map(|(name, backend)| (name.clone(), backend.models.clone()))
            .collect();
        Self { allowed }
    }

    pub fn with_backend(
        mut self,
        backend: impl Into<String>,
        models: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed
            .insert(backend.into(), models.into_iter().map(Into::into).collect());
        self
    }

    pub fn backends(&self) -> Vec<String> {
        self.allowed.keys().cloned().collect()
    }

    pub fn models(&self, backend: &str) -> Option<&[String]> {
        self.allowed.get(backend).map(Vec::as_slice)
    }

    /// Reject unknown backends and models outside the allow-list. The
    /// requested model is never swapped for another one.
    pub fn check(&self, backend: &str, model: &str) -> Result<()> {
        let Some(models) = self.allowed.get(backend) else {
            return Err(Error::UnknownBackend {
                backend: backend.to_string(),
                configured: self.backends(),
            });
        };
        if models.iter().any(|m| m == model) {
            Ok(())
        } else {
            Err(Error::UnknownModel {
                backend: backend.to_string(),
                model: model.to_string(),
                allowed: models.clone(),
            })
        }
    }
}
