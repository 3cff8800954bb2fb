//! BackendClient trait: the abstraction over third-party LLM backends.
//!
//! A backend client knows how to send one prepared call to a vendor API and
//! hand back the raw JSON body plus the few fields every later stage needs.
//! It does not retry, normalize citations or enforce evidence contracts;
//! those belong to the admission controller, citation engine and
//! orchestrator respectively.

use crate::error::BackendError;
use crate::message::Message;
use crate::request::Routing;
use crate::response::TokenUsage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Vendor wire family. Selects the citation rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::OpenAiCompatible => "openai_compatible",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How freely the backend may call evidence tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
}

/// One prepared round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCall {
    /// Final message list, location context already spliced in.
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Attach the backend's web-evidence tools.
    pub evidence_tools: bool,
    pub tool_choice: ToolChoice,
    /// JSON schema for structured output, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
    pub routing: Routing,
}

impl BackendCall {
    /// Whether the backend may actually invoke evidence tools on this call.
    pub fn tools_enabled(&self) -> bool {
        self.evidence_tools && self.tool_choice != ToolChoice::None
    }
}

/// What a backend returned, before any normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBackendResponse {
    /// The full decoded response body.
    pub body: serde_json::Value,
    /// Extracted answer text.
    pub text: String,
    pub usage: TokenUsage,
    /// Evidence tool invocations observed in the body.
    pub tool_call_count: u32,
    /// Overrides the client's `api_surface()` when a call took a different path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_used: Option<String>,
}

/// The core backend trait.
///
/// Every vendor adapter implements this; the orchestrator calls `invoke()`
/// without knowing which vendor sits behind it.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// The configured name (e.g., "openai", "perplexity").
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Transport path identifier, e.g. "openai.responses".
    fn api_surface(&self) -> &str;

    /// Whether the backend can be trusted to honor a mandatory tool call.
    fn supports_required_tools(&self) -> bool {
        false
    }

    /// Send one call. Rate-limit errors are reported, never retried here.
    async fn invoke(&self, call: BackendCall) -> Result<RawBackendResponse, BackendError>;
}
