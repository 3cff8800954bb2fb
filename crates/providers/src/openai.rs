//! OpenAI Responses API client.
//!
//! Evidence tools map to the hosted `web_search` tool; structured output
//! uses `text.format` with a strict JSON schema. The raw body keeps
//! `output[*].content[*].annotations`, which the citation engine reads.

use crate::http::{self, Endpoint};
use async_trait::async_trait;
use groundgate_config::BackendConfig;
use groundgate_core::{
    BackendCall, BackendClient, BackendError, BackendKind, RawBackendResponse, Role, TokenUsage,
    ToolChoice,
};
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const API_SURFACE: &str = "openai.responses";

pub struct OpenAiClient {
    name: String,
    endpoint: Endpoint,
    api_key: String,
    supports_required: bool,
    client: reqwest::Client,
}

impl OpenAiClient {
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

    pub fn build_body(call: &BackendCall) -> Value {
        let input: Vec<Value> = call
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "developer",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = json!({
            "model": call.model,
            "input": input,
            "temperature": call.temperature,
            "max_output_tokens": call.max_output_tokens,
        });

        if call.evidence_tools {
            body["tools"] = json!([{ "type": "web_search" }]);
            body["tool_choice"] = json!(match call.tool_choice {
                ToolChoice::Auto => "auto",
                ToolChoice::None => "none",
            });
        }

        if let Some(schema) = &call.response_schema {
            body["text"] = json!({
                "format": {
                    "type": "json_schema",
                    "name": "response",
                    "schema": schema,
                    "strict": true,
                }
            });
        }
        body
    }

    pub fn parse_response(body: Value) -> Result<RawBackendResponse, BackendError> {
        let output = body
            .get("output")
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::InvalidResponse("missing 'output' array".into()))?;

        let mut text = String::new();
        let mut tool_call_count = 0u32;
        for item in output {
            match item.get("type").and_then(Value::as_str) {
                Some("web_search_call") => tool_call_count += 1,
                Some("message") => {
                    let parts = item.get("content").and_then(Value::as_array);
                    for part in parts.into_iter().flatten() {
                        if part.get("type").and_then(Value::as_str) == Some("output_text") {
                            if let Some(t) = part.get("text").and_then(Value::as_str) {
                                text.push_str(t);
                            }
                        }
                    }
                }
                _ => {}
            }
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
impl BackendClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn api_surface(&self) -> &str {
        API_SURFACE
    }

    fn supports_required_tools(&self) -> bool {
        self.supports_required
    }

    async fn invoke(&self, call: BackendCall) -> Result<RawBackendResponse, BackendError> {
        let url = format!("{}/responses", self.endpoint.resolve(&call.routing));
        let auth = format!("Bearer {}", self.api_key);
        let body = Self::build_body(&call);
        let reply = http::post_json(
            &self.client,
            &self.name,
            &url,
            &[("Authorization", auth.as_str())],
            &body,
        )
        .await?;
        let mut raw = Self::parse_response(reply)?;
        raw.api_used = Some(self.endpoint.surface(API_SURFACE, &call.routing));
        Ok(raw)
    }
}
