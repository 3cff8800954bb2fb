//! Gemini `generateContent` client.
//!
//! Evidence maps to the `google_search` tool. Grounding comes back as
//! `candidates[*].groundingMetadata` (chunks plus supports), usually behind
//! opaque redirect URLs; the citation engine resolves those.

use crate::http::{self, Endpoint};
use async_trait::async_trait;
use groundgate_config::BackendConfig;
use groundgate_core::{
    BackendCall, BackendClient, BackendError, BackendKind, RawBackendResponse, Role, TokenUsage,
};
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_SURFACE: &str = "gemini.generate_content";

pub struct GeminiClient {
    name: String,
    endpoint: Endpoint,
    api_key: String,
    supports_required: bool,
    client: reqwest::Client,
}

impl GeminiClient {
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
        let (system, rest) = http::split_system(&call.messages);
        let contents: Vec<Value> = rest
            .iter()
            .map(|m| {
                let role = if m.role == Role::Assistant { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut generation = json!({
            "temperature": call.temperature,
            "maxOutputTokens": call.max_output_tokens,
        });
        if let Some(schema) = &call.response_schema {
            generation["responseMimeType"] = json!("application/json");
            generation["responseSchema"] = schema.clone();
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation,
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if call.tools_enabled() {
            body["tools"] = json!([{ "google_search": {} }]);
        }
        body
    }

    pub fn parse_response(body: Value) -> Result<RawBackendResponse, BackendError> {
        let candidates = body
            .get("candidates")
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::InvalidResponse("missing 'candidates' array".into()))?;
        let first = candidates
            .first()
            .ok_or_else(|| BackendError::InvalidResponse("no candidates in response".into()))?;

        let text: String = first
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();

        let tool_call_count = candidates
            .iter()
            .map(|c| {
                let meta = c.get("groundingMetadata");
                let queries = meta
                    .and_then(|m| m.get("webSearchQueries"))
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                let has_chunks = meta
                    .and_then(|m| m.get("groundingChunks"))
                    .and_then(Value::as_array)
                    .is_some_and(|a| !a.is_empty());
                if queries == 0 && has_chunks { 1 } else { queries as u32 }
            })
            .sum();

        let usage = body
            .get("usageMetadata")
            .map(|u| {
                let read = |k: &str| u.get(k).and_then(Value::as_u64).unwrap_or(0) as u32;
                TokenUsage::new(read("promptTokenCount"), read("candidatesTokenCount"))
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
impl BackendClient for GeminiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn api_surface(&self) -> &str {
        API_SURFACE
    }

    fn supports_required_tools(&self) -> bool {
        self.supports_required
    }

    async fn invoke(&self, call: BackendCall) -> Result<RawBackendResponse, BackendError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.resolve(&call.routing),
            call.model
        );
        let body = Self::build_body(&call);
        let reply = http::post_json(
            &self.client,
            &self.name,
            &url,
            &[("x-goog-api-key", self.api_key.as_str())],
            &body,
        )
        .await?;
        let mut raw = Self::parse_response(reply)?;
        raw.api_used = Some(self.endpoint.surface(API_SURFACE, &call.routing));
        Ok(raw)
    }
}
