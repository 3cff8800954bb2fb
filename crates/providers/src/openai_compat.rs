//! OpenAI-compatible chat-completions client.
//!
//! Works with search-augmented endpoints such as Perplexity that speak the
//! `/chat/completions` dialect and return evidence as top-level
//! `citations` / `search_results`, plus plain OpenAI-compatible servers
//! that return `url_citation` annotations on the message.

use crate::http::{self, Endpoint};
use async_trait::async_trait;
use groundgate_config::BackendConfig;
use groundgate_core::{
    BackendCall, BackendClient, BackendError, BackendKind, RawBackendResponse, Role, TokenUsage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const API_SURFACE: &str = "openai_compatible.chat_completions";

pub struct OpenAiCompatClient {
    name: String,
    endpoint: Endpoint,
    api_key: String,
    supports_required: bool,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
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
        let messages: Vec<ApiMessage> = call
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system".into(),
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect();

        let mut body = json!({
            "model": call.model,
            "messages": messages,
            "temperature": call.temperature,
            "max_tokens": call.max_output_tokens,
            "stream": false,
        });

        if call.tools_enabled() {
            body["web_search_options"] = json!({ "search_context_size": "medium" });
        } else {
            body["disable_search"] = json!(true);
        }

        if let Some(schema) = &call.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "schema": schema },
            });
        }
        body
    }

    pub fn parse_response(body: Value) -> Result<RawBackendResponse, BackendError> {
        let api: ApiResponse = serde_json::from_value(body.clone())
            .map_err(|e| BackendError::InvalidResponse(format!("failed to parse response: {e}")))?;

        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("no choices in response".into()))?;

        // These endpoints search implicitly; evidence in the body is the only
        // sign a search ran.
        let non_empty = |v: Option<&Value>| v.and_then(Value::as_array).is_some_and(|a| !a.is_empty());
        let searched = non_empty(body.get("citations"))
            || non_empty(body.get("search_results"))
            || non_empty(body.pointer("/choices/0/message/annotations"));

        let usage = api
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(RawBackendResponse {
            text: choice.message.content.unwrap_or_default(),
            body,
            usage,
            tool_call_count: u32::from(searched),
            api_used: None,
        })
    }
}

#[async_trait]
impl BackendClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OpenAiCompatible
    }

    fn api_surface(&self) -> &str {
        API_SURFACE
    }

    fn supports_required_tools(&self) -> bool {
        self.supports_required
    }

    async fn invoke(&self, call: BackendCall) -> Result<RawBackendResponse, BackendError> {
        let url = format!("{}/chat/completions", self.endpoint.resolve(&call.routing));
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

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
