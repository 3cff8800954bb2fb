//! JSON request body for `POST /v1/complete`.

use groundgate_core::{CanonicalRequest, EvidenceMode, Message, RequestError, Role, Routing};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<WireMessage> for Message {
    fn from(m: WireMessage) -> Self {
        match m.role {
            Role::System => Message::system(m.content),
            Role::User => Message::user(m.content),
            Role::Assistant => Message::assistant(m.content),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub backend: String,
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub evidence_mode: EvidenceMode,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub location_context: Option<String>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub routing: Option<Routing>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Caller deadline for the backend round trips.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl CompleteRequest {
    /// The caller's deadline, capped at `ceiling`.
    pub fn deadline(&self, default: Duration, ceiling: Duration) -> Duration {
        self.deadline_ms
            .map_or(default, Duration::from_millis)
            .min(ceiling)
    }

    pub fn into_canonical(self) -> Result<CanonicalRequest, RequestError> {
        let mut builder = CanonicalRequest::builder(self.backend, self.model)
            .messages(self.messages.into_iter().map(Message::from))
            .evidence_mode(self.evidence_mode);
        if let Some(tokens) = self.max_output_tokens {
            builder = builder.max_output_tokens(tokens);
        }
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(ctx) = self.location_context {
            builder = builder.location_context(ctx);
        }
        if let Some(schema) = self.output_schema {
            builder = builder.output_schema(schema);
        }
        if let Some(routing) = self.routing {
            builder = builder.routing(routing);
        }
        for (key, value) in self.metadata {
            builder = builder.metadata(key, value);
        }
        builder.build()
    }
}
