//! Anthropic Messages API client.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt (including the location-context preamble) as a top-level field
//! - Evidence via the server-side `web_search` tool; citations arrive as
//!   `citations` on text blocks and as `web_search_tool_result` blocks
//! - No native schema enforcement: the schema is appended to the system prompt

use crate::http::{self, Endpoint};
use async_trait::async_trait;
use groundgate_config::BackendConfig;
use groundgate_core::{
    BackendCall, BackendClient, BackendError, BackendKind, Message, RawBackendResponse, Role,
    TokenUsage, ToolChoice,
};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const API_SURFACE: &str = "anthropic.messages";
const WEB_SEARCH_TOOL: &str = "web_search_20250305";
const WEB_SEARCH_MAX_USES: u32 = 5;

pub struct AnthropicClient {
    name: String,
    endpoint: Endpoint,
    api_key: String,
    supports_required: bool,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(name: impl Into<String>, config: &BackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            name: name.into(),
            endpoint: Endpoint::new(
                config.api_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
                config.routed_api_url.clone(),
            ),
            api_key: config.api_key.clone().unwrap_or_default(),
            supports_required: config.supports_required_tools,
            client: http::build_client(Duration::from_secs(config.timeout_secs))?,
        })
    }

    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                },
                content: m.content.clone(),
            })
            .collect()
    }

    pub fn build_body(call: &BackendCall) -> Result<Value, BackendError> {
        let (mut system, rest) = http::split_system(&call.messages);
        if let Some(schema) = &call.response_schema {
            let instruction = http::schema_instruction(schema);
            system = Some(match system {
                Some(s) => format!("{s}\n\n{instruction}"),
                None => instruction,
            });
        }

        let (tools, tool_choice) = if call.evidence_tools {
            let choice = match call.tool_choice {
                ToolChoice::Auto => "auto",
                ToolChoice::None => "none",
            };
            (
                vec![AnthropicTool {
                    r#type: WEB_SEARCH_TOOL,
                    name: "web_search",
                    max_uses: WEB_SEARCH_MAX_USES,
                }],
                Some(AnthropicToolChoice { r#type: choice }),
            )
        } else {
            (Vec::new(), None)
        };

        let request = AnthropicRequest {
            model: &call.model,
            messages: Self::to_api_messages(&rest),
            system,
            max_tokens: call.max_output_tokens,
            temperature: call.temperature,
            tools,
            tool_choice,
        };
        serde_json::to_value(request)
            .map_err(|e| BackendError::InvalidResponse(format!("failed to encode request: {e}")))
    }

    pub fn parse_response(body: Value) -> Result<RawBackendResponse, BackendError> {
        let content = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::InvalidResponse("missing 'content' array".into()))?;

        let mut text = String::new();
        let mut tool_call_count = 0u32;
        for block in content {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("server_tool_use") => tool_call_count += 1,
                _ => {}
            }
        }

        // Older payloads only report the count in usage.
        if tool_call_count == 0 {
            tool_call_count = body
                .pointer("/usage/server_tool_use/web_search_requests")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
        }

        let usage = body
            .get("usage")
            .map(|u| {
                let read = |k: &str| u.get(k).and_then(Value::as_u64).unwrap_or(0) as u32;
                TokenUsage::new(read("input_tokens"), read("output_tokens"))
            })
            .unwrap_or_default();

        Ok(RawBackendResponse {
            body,
            text,
            usage,
            tool_call_count,
            api_used: None,
        })
    }
}

#[async_trait]
impl BackendClient for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
    }

    fn api_surface(&self) -> &str {
        API_SURFACE
    }

    fn supports_required_tools(&self) -> bool {
        self.supports_required
    }

    async fn invoke(&self, call: BackendCall) -> Result<RawBackendResponse, BackendError> {
        let url = format!("{}/v1/messages", self.endpoint.resolve(&call.routing));
        let body = Self::build_body(&call)?;
        let reply = http::post_json(
            &self.client,
            &self.name,
            &url,
            &[
                ("x-api-key", self.api_key.as_str()),
                ("anthropic-version", ANTHROPIC_VERSION),
            ],
            &body,
        )
        .await?;
        let mut raw = Self::parse_response(reply)?;
        raw.api_used = Some(self.endpoint.surface(API_SURFACE, &call.routing));
        Ok(raw)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<AnthropicToolChoice>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    r#type: &'static str,
    name: &'static str,
    max_uses: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicToolChoice {
    r#type: &'static str,
}
