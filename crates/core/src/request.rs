//! The canonical request callers hand to the orchestrator.
//!
//! A [`CanonicalRequest`] is immutable once built: fields are private and
//! only reachable through getters. Two things may change afterwards:
//! the provenance `metadata` map, and the
//! one-shot location-context splice performed by
//! [`CanonicalRequest::apply_location_context`].

use crate::error::RequestError;
use crate::message::{Message, MessageKind};
use crate::provenance;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Hard upper bound on the normalized location-context length, in characters.
pub const MAX_LOCATION_CONTEXT_CHARS: usize = 350;

/// What the caller wants in terms of web evidence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMode {
    /// Plain completion; no evidence tools.
    #[default]
    None,
    /// Evidence tools available, the model decides.
    Auto,
    /// Evidence is mandatory; the call fails closed without anchored citations.
    Required,
}

impl EvidenceMode {
    /// Whether evidence-gathering tools are attached for this mode.
    pub fn gathers_evidence(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Auto => "auto",
            Self::Required => "required",
        }
    }
}

impl std::fmt::Display for EvidenceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How location context reaches the backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// No location context.
    #[default]
    None,
    /// Location context spliced in as a preamble message.
    Preamble,
}

impl ContextPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Preamble => "preamble",
        }
    }
}

/// The (evidence mode, context policy) pair the admission controller
/// keys its multipliers and samples on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenClass {
    pub evidence_mode: EvidenceMode,
    pub context_policy: ContextPolicy,
}

impl TokenClass {
    pub fn new(evidence_mode: EvidenceMode, context_policy: ContextPolicy) -> Self {
        Self {
            evidence_mode,
            context_policy,
        }
    }

    /// Every class, in a stable order.
    pub fn all() -> [TokenClass; 6] {
        use ContextPolicy as C;
        use EvidenceMode as E;
        [
            Self::new(E::None, C::None),
            Self::new(E::None, C::Preamble),
            Self::new(E::Auto, C::None),
            Self::new(E::Auto, C::Preamble),
            Self::new(E::Required, C::None),
            Self::new(E::Required, C::Preamble),
        ]
    }

    /// Evidence gathering combined with a location-context policy.
    pub fn is_heavy(self) -> bool {
        self.evidence_mode.gathers_evidence() && self.context_policy != ContextPolicy::None
    }
}

impl std::fmt::Display for TokenClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            self.evidence_mode.as_str(),
            self.context_policy.as_str()
        )
    }
}

impl std::str::FromStr for TokenClass {
    type Err = String;

    /// Parse `"<evidence_mode>/<context_policy>"`, e.g. `"auto/preamble"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mode, policy) = s
            .split_once('/')
            .ok_or_else(|| format!("expected '<evidence_mode>/<context_policy>', got '{s}'"))?;
        let evidence_mode = match mode.trim() {
            "none" => EvidenceMode::None,
            "auto" => EvidenceMode::Auto,
            "required" => EvidenceMode::Required,
            other => return Err(format!("unknown evidence mode '{other}'")),
        };
        let context_policy = match policy.trim() {
            "none" => ContextPolicy::None,
            "preamble" => ContextPolicy::Preamble,
            other => return Err(format!("unknown context policy '{other}'")),
        };
        Ok(Self::new(evidence_mode, context_policy))
    }
}

/// Which transport path the call travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// The backend's default endpoint.
    #[default]
    Standard,
    /// A region-pinned routing policy layered on top of the endpoint.
    Routed,
}

impl TransportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Routed => "routed",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing policy for a call; also the circuit-breaker key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Routing {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub transport_mode: TransportMode,
}

fn default_region() -> String {
    "global".into()
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            region: default_region(),
            transport_mode: TransportMode::Standard,
        }
    }
}

impl Routing {
    pub fn new(region: impl Into<String>, transport_mode: TransportMode) -> Self {
        Self {
            region: region.into(),
            transport_mode,
        }
    }
}

/// A validated, NFC-normalized location-context block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct LocationContext {
    text: String,
    chars: usize,
}

impl LocationContext {
    /// Normalize `raw` to Unicode NFC and check the length bound.
    ///
    /// Oversized input is rejected, never truncated.
    pub fn new(raw: &str) -> Result<Self, RequestError> {
        let text: String = raw.nfc().collect::<String>().trim().to_string();
        if text.is_empty() {
            return Err(RequestError::EmptyLocationContext);
        }
        let chars = text.chars().count();
        if chars > MAX_LOCATION_CONTEXT_CHARS {
            return Err(RequestError::ContextTooLong {
                length: chars,
                max: MAX_LOCATION_CONTEXT_CHARS,
            });
        }
        Ok(Self { text, chars })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters after normalization.
    pub fn char_len(&self) -> usize {
        self.chars
    }

    pub fn hash(&self) -> String {
        provenance::sha256_hex(&self.text)
    }
}

impl From<LocationContext> for String {
    fn from(ctx: LocationContext) -> Self {
        ctx.text
    }
}

impl<'de> Deserialize<'de> for LocationContext {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        LocationContext::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// The canonical, backend-independent request.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalRequest {
    messages: Vec<Message>,
    evidence_mode: EvidenceMode,
    backend: String,
    model_id: String,
    max_output_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    location_context: Option<LocationContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_schema: Option<serde_json::Value>,
    routing: Routing,
    context_applied: bool,

    /// Provenance only; never read for control flow.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CanonicalRequest {
    /// Start building a request for `backend` / `model_id`.
    pub fn builder(backend: impl Into<String>, model_id: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(backend, model_id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn evidence_mode(&self) -> EvidenceMode {
        self.evidence_mode
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn location_context(&self) -> Option<&LocationContext> {
        self.location_context.as_ref()
    }

    pub fn output_schema(&self) -> Option<&serde_json::Value> {
        self.output_schema.as_ref()
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn context_applied(&self) -> bool {
        self.context_applied
    }

    pub fn context_policy(&self) -> ContextPolicy {
        if self.location_context.is_some() {
            ContextPolicy::Preamble
        } else {
            ContextPolicy::None
        }
    }

    pub fn token_class(&self) -> TokenClass {
        TokenClass::new(self.evidence_mode, self.context_policy())
    }

    /// Structured output and evidence gathering together need two round trips.
    pub fn needs_two_step(&self) -> bool {
        self.output_schema.is_some() && self.evidence_mode.gathers_evidence()
    }

    /// Splice the location context into the message list, at most once.
    ///
    /// The preamble lands directly after the leading caller system messages
    /// and before the first non-system message. Provenance (exact text,
    /// length, hash) is recorded in `metadata`. Returns `true` only when the
    /// splice happened on this call.
    pub fn apply_location_context(&mut self) -> bool {
        if self.context_applied {
            return false;
        }
        let Some(ctx) = self.location_context.clone() else {
            return false;
        };

        let at = self
            .messages
            .iter()
            .position(|m| !m.is_caller_system())
            .unwrap_or(self.messages.len());
        self.messages
            .insert(at, Message::location_context(ctx.text()));
        self.context_applied = true;

        self.metadata.insert(
            provenance::LOCATION_CONTEXT_TEXT.into(),
            serde_json::Value::String(ctx.text().to_string()),
        );
        self.metadata.insert(
            provenance::LOCATION_CONTEXT_LENGTH.into(),
            serde_json::json!(ctx.char_len()),
        );
        self.metadata.insert(
            provenance::LOCATION_CONTEXT_HASH.into(),
            serde_json::Value::String(ctx.hash()),
        );
        true
    }

    /// Number of location-context preambles currently in the message list.
    pub fn location_context_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_location_context())
            .count()
    }
}

/// Builder for [`CanonicalRequest`]; validation happens in [`RequestBuilder::build`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    messages: Vec<Message>,
    evidence_mode: EvidenceMode,
    backend: String,
    model_id: String,
    max_output_tokens: u32,
    temperature: f32,
    location_context: Option<String>,
    output_schema: Option<serde_json::Value>,
    routing: Routing,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl RequestBuilder {
    fn new(backend: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            evidence_mode: EvidenceMode::None,
            backend: backend.into(),
            model_id: model_id.into(),
            max_output_tokens: 1024,
            temperature: 0.2,
            location_context: None,
            output_schema: None,
            routing: Routing::default(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Append a caller message. Caller messages are always
    /// [`MessageKind::Conversation`]; only the orchestrator injects context.
    pub fn message(mut self, mut message: Message) -> Self {
        message.kind = MessageKind::Conversation;
        self.messages.push(message);
        self
    }

    pub fn messages(self, messages: impl IntoIterator<Item = Message>) -> Self {
        messages.into_iter().fold(self, |b, m| b.message(m))
    }

    pub fn evidence_mode(mut self, mode: EvidenceMode) -> Self {
        self.evidence_mode = mode;
        self
    }

    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn location_context(mut self, raw: impl Into<String>) -> Self {
        self.location_context = Some(raw.into());
        self
    }

    pub fn output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<CanonicalRequest, RequestError> {
        if self.messages.is_empty() {
            return Err(RequestError::EmptyMessages);
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RequestError::InvalidTemperature(self.temperature));
        }
        if self.max_output_tokens == 0 {
            return Err(RequestError::InvalidMaxOutputTokens);
        }
        let location_context = self
            .location_context
            .as_deref()
            .map(LocationContext::new)
            .transpose()?;

        Ok(CanonicalRequest {
            messages: self.messages,
            evidence_mode: self.evidence_mode,
            backend: self.backend,
            model_id: self.model_id,
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
            location_context,
            output_schema: self.output_schema,
            routing: self.routing,
            context_applied: false,
            metadata: self.metadata,
        })
    }
}
