//! Shared HTTP plumbing for the vendor clients: client construction,
//! endpoint selection by routing, and status-code to [`BackendError`]
//! mapping.

use groundgate_core::{BackendError, Message, Role, Routing, TransportFailure, TransportMode};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

pub fn build_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::NotConfigured(format!("failed to create HTTP client: {e}")))
}

/// Base URL and optional routed template for one backend.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base_url: String,
    routed_template: Option<String>,
}

impl Endpoint {
    pub fn new(base_url: impl Into<String>, routed_template: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            routed_template: routed_template.map(|t| t.trim_end_matches('/').to_string()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL for a call. Routed calls use the regional template when one
    /// is configured and the standard endpoint otherwise.
    pub fn resolve(&self, routing: &Routing) -> String {
        match (routing.transport_mode, &self.routed_template) {
            (TransportMode::Routed, Some(template)) => template.replace("{region}", &routing.region),
            _ => self.base_url.clone(),
        }
    }

    /// API surface id, suffixed with `.routed` when the regional endpoint serves the call.
    pub fn surface(&self, base: &str, routing: &Routing) -> String {
        if routing.transport_mode == TransportMode::Routed && self.routed_template.is_some() {
            format!("{base}.routed")
        } else {
            base.to_string()
        }
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    let kind = if e.is_timeout() {
        TransportFailure::Timeout
    } else if e.is_connect() {
        TransportFailure::Connect
    } else {
        TransportFailure::Interrupted
    };
    BackendError::transport(kind, e.to_string())
}

/// Server-supplied retry delay from `retry-after-ms` or `retry-after` (seconds).
pub fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };
    read("retry-after-ms")
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .or_else(|| read("retry-after").map(Duration::from_secs_f64))
}

/// Map a non-success status to the error taxonomy.
pub fn status_error(status: u16, retry: Option<Duration>, body: &str) -> BackendError {
    let mut message: String = body.chars().take(MAX_ERROR_BODY).collect();
    if message.is_empty() {
        message = format!("HTTP {status}");
    }
    match status {
        429 => BackendError::RateLimited { retry_after: retry },
        401 | 403 => BackendError::Auth(message),
        408 | 504 => BackendError::transport(TransportFailure::Timeout, message),
        502 | 503 => BackendError::transport(TransportFailure::Interrupted, message),
        _ => BackendError::Api {
            status_code: status,
            message,
        },
    }
}

/// POST a JSON body and decode a JSON reply.
pub async fn post_json(
    client: &reqwest::Client,
    backend: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: &serde_json::Value,
) -> Result<serde_json::Value, BackendError> {
    debug!(backend, url, "Sending backend request");

    let mut request = client.post(url).header("Content-Type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = request.json(body).send().await.map_err(transport_error)?;

    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let retry = retry_after(response.headers());
        let error_body = response.text().await.unwrap_or_default();
        warn!(backend, status, "Backend returned error");
        return Err(status_error(status, retry, &error_body));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| BackendError::InvalidResponse(format!("failed to parse response: {e}")))
}

/// Pull system messages out of the list, joined, for vendors with a
/// top-level system field.
pub fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut rest: Vec<&Message> = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(&msg.content),
            _ => rest.push(msg),
        }
    }
    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, rest)
}

/// Instruction appended for vendors without native schema enforcement.
pub fn schema_instruction(schema: &serde_json::Value) -> String {
    format!(
        "Respond with a single JSON value that validates against this JSON schema, \
         and nothing else:\n{schema}"
    )
}
