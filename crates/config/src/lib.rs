//! Configuration loading, validation, and management for GroundGate.
//!
//! Loads configuration from `~/.groundgate/config.toml` with environment
//! variable overrides. Validates all settings at startup so a bad limit or
//! an empty model allow-list fails fast instead of on the first call.

use groundgate_core::{BackendKind, TokenClass};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.groundgate/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Admission controller limits and tuning
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Orchestrator deadlines and evidence settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Telemetry sink selection
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Configured backends, keyed by name
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Upper bound on a single HTTP request, including retries and finalize.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_port() -> u16 {
    8470
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Limits for the adaptive admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Sliding window length.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Token budget per window for backends without their own limit.
    #[serde(default = "default_tokens_per_window")]
    pub tokens_per_window: u64,

    /// Auto-trim never shrinks output below this.
    #[serde(default = "default_min_output_tokens")]
    pub min_output_tokens: u32,

    /// Starting multiplier for evidence classes.
    #[serde(default = "default_evidence_multiplier")]
    pub evidence_multiplier: f64,

    /// Starting multiplier for plain classes.
    #[serde(default = "default_plain_multiplier")]
    pub plain_multiplier: f64,

    /// Per-class starting overrides, keyed `"<evidence_mode>/<context_policy>"`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub multipliers: HashMap<String, f64>,

    #[serde(default = "default_min_multiplier")]
    pub min_multiplier: f64,

    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: f64,

    /// Rolling sample length for self-tuning.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Percentile the multiplier tracks.
    #[serde(default = "default_percentile")]
    pub percentile: f64,

    /// Samples a class needs before its multiplier starts tracking them.
    #[serde(default = "default_tuning_min_samples")]
    pub tuning_min_samples: usize,

    /// Fraction of the window that must be unused before a heavy call starts.
    #[serde(default = "default_heavy_freshness")]
    pub heavy_freshness: f64,

    /// Parallel slots for non-heavy calls, per backend.
    #[serde(default = "default_concurrency_slots")]
    pub concurrency_slots: usize,

    #[serde(default)]
    pub circuit: CircuitConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_window_secs() -> u64 {
    60
}
fn default_tokens_per_window() -> u64 {
    200_000
}
fn default_min_output_tokens() -> u32 {
    256
}
fn default_evidence_multiplier() -> f64 {
    2.25
}
fn default_plain_multiplier() -> f64 {
    1.2
}
fn default_min_multiplier() -> f64 {
    1.0
}
fn default_max_multiplier() -> f64 {
    4.0
}
fn default_sample_size() -> usize {
    20
}
fn default_percentile() -> f64 {
    0.9
}
fn default_tuning_min_samples() -> usize {
    5
}
fn default_heavy_freshness() -> f64 {
    0.8
}
fn default_concurrency_slots() -> usize {
    4
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            tokens_per_window: default_tokens_per_window(),
            min_output_tokens: default_min_output_tokens(),
            evidence_multiplier: default_evidence_multiplier(),
            plain_multiplier: default_plain_multiplier(),
            multipliers: HashMap::new(),
            min_multiplier: default_min_multiplier(),
            max_multiplier: default_max_multiplier(),
            sample_size: default_sample_size(),
            percentile: default_percentile(),
            tuning_min_samples: default_tuning_min_samples(),
            heavy_freshness: default_heavy_freshness(),
            concurrency_slots: default_concurrency_slots(),
            circuit: CircuitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl AdmissionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Starting multiplier for a class: explicit override, else the
    /// evidence or plain default.
    pub fn initial_multiplier(&self, class: TokenClass) -> f64 {
        if let Some(m) = self.multipliers.get(&class.to_string()) {
            return *m;
        }
        if class.evidence_mode.gathers_evidence() {
            self.evidence_multiplier
        } else {
            self.plain_multiplier
        }
    }
}

/// Circuit breaker settings, shared by every (region, transport) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive transport errors before the circuit opens.
    #[serde(default = "default_circuit_threshold")]
    pub threshold: u32,

    #[serde(default = "default_circuit_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_circuit_threshold() -> u32 {
    5
}
fn default_circuit_cooldown_secs() -> u64 {
    30
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            threshold: default_circuit_threshold(),
            cooldown_secs: default_circuit_cooldown_secs(),
        }
    }
}

impl CircuitConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Retry policy for rate-limit and transport errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random spread applied to each delay, as a fraction (0.2 = ±20%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    20_000
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Deadline applied when the caller sets none.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Output budget of the post-deadline finalize round trip.
    #[serde(default = "default_finalize_max_tokens")]
    pub finalize_max_tokens: u32,

    #[serde(default = "default_finalize_timeout_secs")]
    pub finalize_timeout_secs: u64,

    /// Whether a finalize round trip is attempted at all.
    #[serde(default = "default_true")]
    pub finalize_on_deadline: bool,

    /// Cap on URLs recovered from answer text.
    #[serde(default = "default_harvest_max_urls")]
    pub harvest_max_urls: usize,

    #[serde(default = "default_harvest_budget_ms")]
    pub harvest_budget_ms: u64,
}

fn default_call_timeout_secs() -> u64 {
    60
}
fn default_finalize_max_tokens() -> u32 {
    512
}
fn default_finalize_timeout_secs() -> u64 {
    15
}
fn default_harvest_max_urls() -> usize {
    8
}
fn default_harvest_budget_ms() -> u64 {
    50
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            finalize_max_tokens: default_finalize_max_tokens(),
            finalize_timeout_secs: default_finalize_timeout_secs(),
            finalize_on_deadline: true,
            harvest_max_urls: default_harvest_max_urls(),
            harvest_budget_ms: default_harvest_budget_ms(),
        }
    }
}

/// Telemetry sink selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// "log" or "none"
    #[serde(default = "default_sink")]
    pub sink: String,
}

fn default_sink() -> String {
    "log".into()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: default_sink(),
        }
    }
}

/// One configured backend.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Wire family
    pub kind: BackendKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override the vendor's default endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Endpoint for routed transport; `{region}` is substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routed_api_url: Option<String>,

    /// Model allow-list. Requests for anything else are rejected.
    pub models: Vec<String>,

    /// Per-window token budget; falls back to `admission.tokens_per_window`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_window: Option<u64>,

    /// Whether the backend honors a mandatory evidence tool call.
    #[serde(default)]
    pub supports_required_tools: bool,

    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_timeout_secs() -> u64 {
    60
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("routed_api_url", &self.routed_api_url)
            .field("models", &self.models)
            .field("tokens_per_window", &self.tokens_per_window)
            .field("supports_required_tools", &self.supports_required_tools)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl BackendConfig {
    pub fn new(kind: BackendKind, models: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind,
            api_key: None,
            api_url: None,
            routed_api_url: None,
            models: models.into_iter().map(Into::into).collect(),
            tokens_per_window: None,
            supports_required_tools: false,
            timeout_secs: default_backend_timeout_secs(),
        }
    }

    pub fn allows_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

impl GatewayConfig {
    /// Load configuration from `GROUNDGATE_CONFIG` or the default path
    /// (~/.groundgate/config.toml), then apply environment overrides:
    /// - `GROUNDGATE_HOST`, `GROUNDGATE_PORT`
    /// - `<BACKEND_NAME>_API_KEY` for each configured backend without a key
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("GROUNDGATE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"));
        Self::load_with_env(&path)
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(host) = lookup("GROUNDGATE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("GROUNDGATE_PORT") {
            self.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("GROUNDGATE_PORT is not a port: {port}"))
            })?;
        }
        for (name, backend) in self.backends.iter_mut() {
            if backend.api_key.is_none() {
                backend.api_key = lookup(&api_key_var(name));
            }
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".groundgate")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.admission;
        if a.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "admission.window_secs must be > 0".into(),
            ));
        }
        if a.tokens_per_window == 0 {
            return Err(ConfigError::ValidationError(
                "admission.tokens_per_window must be > 0".into(),
            ));
        }
        if a.min_output_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "admission.min_output_tokens must be > 0".into(),
            ));
        }
        if !(a.min_multiplier > 0.0 && a.min_multiplier <= a.max_multiplier) {
            return Err(ConfigError::ValidationError(
                "admission multipliers need 0 < min_multiplier <= max_multiplier".into(),
            ));
        }
        for (key, m) in &a.multipliers {
            key.parse::<TokenClass>().map_err(|e| {
                ConfigError::ValidationError(format!("admission.multipliers: {e}"))
            })?;
            if *m <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "admission.multipliers.\"{key}\" must be > 0"
                )));
            }
        }
        if a.sample_size == 0 {
            return Err(ConfigError::ValidationError(
                "admission.sample_size must be > 0".into(),
            ));
        }
        if a.tuning_min_samples == 0 || a.tuning_min_samples > a.sample_size {
            return Err(ConfigError::ValidationError(
                "admission.tuning_min_samples must be in 1..=sample_size".into(),
            ));
        }
        if !(a.percentile > 0.0 && a.percentile <= 1.0) {
            return Err(ConfigError::ValidationError(
                "admission.percentile must be in (0, 1]".into(),
            ));
        }
        if !(0.0..=1.0).contains(&a.heavy_freshness) {
            return Err(ConfigError::ValidationError(
                "admission.heavy_freshness must be in [0, 1]".into(),
            ));
        }
        if a.concurrency_slots == 0 {
            return Err(ConfigError::ValidationError(
                "admission.concurrency_slots must be > 0".into(),
            ));
        }
        if a.circuit.threshold == 0 {
            return Err(ConfigError::ValidationError(
                "admission.circuit.threshold must be > 0".into(),
            ));
        }
        if a.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "admission.retry.max_attempts must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&a.retry.jitter) {
            return Err(ConfigError::ValidationError(
                "admission.retry.jitter must be in [0, 1]".into(),
            ));
        }

        let o = &self.orchestrator;
        if o.finalize_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.finalize_max_tokens must be > 0".into(),
            ));
        }
        if o.harvest_max_urls == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.harvest_max_urls must be > 0".into(),
            ));
        }

        if !matches!(self.telemetry.sink.as_str(), "log" | "none") {
            return Err(ConfigError::ValidationError(format!(
                "telemetry.sink must be \"log\" or \"none\", got \"{}\"",
                self.telemetry.sink
            )));
        }

        for (name, backend) in &self.backends {
            if backend.models.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "backends.{name}.models must list at least one model"
                )));
            }
            if backend.tokens_per_window == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "backends.{name}.tokens_per_window must be > 0"
                )));
            }
        }
        Ok(())
    }

    /// Token budget per window for `backend`.
    pub fn tokens_per_window(&self, backend: &str) -> u64 {
        self.backends
            .get(backend)
            .and_then(|b| b.tokens_per_window)
            .unwrap_or(self.admission.tokens_per_window)
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.backends.insert(
            "openai".into(),
            BackendConfig::new(BackendKind::OpenAi, ["gpt-4o", "gpt-4o-mini"]),
        );
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Environment variable holding the API key for backend `name`.
pub fn api_key_var(name: &str) -> String {
    let mut var: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    var.push_str("_API_KEY");
    var
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for groundgate_core::Error {
    fn from(e: ConfigError) -> Self {
        groundgate_core::Error::Config {
            message: e.to_string(),
        }
    }
}
