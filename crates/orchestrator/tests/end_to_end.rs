//! End-to-end tests for the GroundGate orchestrator.
//!
//! These drive complete calls through context injection, admission,
//! scripted backends, citation normalization and post-validation, and
//! check the single telemetry record each call leaves behind.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use groundgate_admission::{AdmissionController, ReservationProfile};
use groundgate_config::AdmissionConfig;
use groundgate_core::{
    BackendCall, BackendClient, BackendError, BackendKind, CanonicalRequest, EvidenceMode,
    Message, MessageKind, RawBackendResponse, Routing, SourceType, TokenUsage, TransportMode,
    WhyNotGrounded, provenance,
};
use groundgate_orchestrator::{ModelCatalog, Orchestrator};
use groundgate_providers::BackendRegistry;
use groundgate_telemetry::MemorySink;
use serde_json::{Value, json};

const BACKEND: &str = "mock";
const MODEL: &str = "mock-large";
const CAPACITY: u64 = 100_000;

// ── Scripted backend ─────────────────────────────────────────────────────

enum Reply {
    Ok(RawBackendResponse),
    Err(BackendError),
    Slow(Duration, RawBackendResponse),
}

/// A backend that plays back scripted replies in order and records every
/// call it receives.
struct ScriptedBackend {
    supports_required: bool,
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<BackendCall>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Reply>) -> Self {
        Self {
            supports_required: false,
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn supporting_required(mut self) -> Self {
        self.supports_required = true;
        self
    }

    fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BackendClient for ScriptedBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn api_surface(&self) -> &str {
        "openai.responses"
    }

    fn supports_required_tools(&self) -> bool {
        self.supports_required
    }

    async fn invoke(&self, call: BackendCall) -> Result<RawBackendResponse, BackendError> {
        self.calls.lock().unwrap().push(call);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Ok(raw)) => Ok(raw),
            Some(Reply::Err(e)) => Err(e),
            Some(Reply::Slow(delay, raw)) => {
                tokio::time::sleep(delay).await;
                Ok(raw)
            }
            None => Err(BackendError::InvalidResponse("script exhausted".into())),
        }
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn raw(body: Value, text: &str, tool_calls: u32) -> RawBackendResponse {
    RawBackendResponse {
        body,
        text: text.to_string(),
        usage: TokenUsage::new(50, 20),
        tool_call_count: tool_calls,
        api_used: Some("openai.responses".into()),
    }
}

fn message_item(text: &str, annotations: Value) -> Value {
    json!({
        "type": "message",
        "content": [{ "type": "output_text", "text": text, "annotations": annotations }]
    })
}

/// A plain answer with no evidence at all.
fn plain(text: &str) -> RawBackendResponse {
    raw(json!({ "output": [message_item(text, json!([]))] }), text, 0)
}

/// Tools ran; the only evidence is a source list with no anchors.
fn unlinked_only(text: &str) -> RawBackendResponse {
    let body = json!({
        "output": [
            {
                "type": "web_search_call",
                "action": { "sources": [
                    { "type": "url", "url": "https://www.visitlisboa.com/en/museums" },
                    { "type": "url", "url": "https://museu.gulbenkian.pt/en/visit" }
                ]}
            },
            message_item(text, json!([]))
        ]
    });
    raw(body, text, 1)
}

/// Tools ran but returned no structured evidence; the answer text names
/// its sources inline.
fn urls_in_text_only(text: &str) -> RawBackendResponse {
    let body = json!({
        "output": [
            { "type": "web_search_call", "status": "completed" },
            message_item(text, json!([]))
        ]
    });
    raw(body, text, 1)
}

/// Tools ran and the answer is tied to a source.
fn anchored(text: &str) -> RawBackendResponse {
    let body = json!({
        "output": [
            { "type": "web_search_call", "status": "completed" },
            message_item(text, json!([{
                "type": "url_citation",
                "url": "https://www.museudooriente.pt/horarios",
                "title": "Horários",
                "start_index": 0,
                "end_index": 10
            }]))
        ]
    });
    raw(body, text, 1)
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    orchestrator: Orchestrator,
    backend: Arc<ScriptedBackend>,
    sink: Arc<MemorySink>,
}

fn harness(backend: ScriptedBackend) -> Harness {
    harness_with_capacity(backend, CAPACITY)
}

fn harness_with_capacity(backend: ScriptedBackend, capacity: u64) -> Harness {
    let backend = Arc::new(backend);
    let mut registry = BackendRegistry::new();
    registry.register(backend.clone());

    let admission = Arc::new(AdmissionController::new(
        &AdmissionConfig::default(),
        [(BACKEND.to_string(), capacity)],
    ));
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Orchestrator::new(
        registry,
        ModelCatalog::new().with_backend(BACKEND, [MODEL]),
        admission,
        sink.clone(),
    );
    Harness {
        orchestrator,
        backend,
        sink,
    }
}

fn request(mode: EvidenceMode) -> CanonicalRequest {
    CanonicalRequest::builder(BACKEND, MODEL)
        .message(Message::user("Which museums in Lisbon open late on Fridays?"))
        .evidence_mode(mode)
        .max_output_tokens(800)
        .build()
        .unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn none_evidence_with_history_returns_plain_answer() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(plain("Try the Gulbenkian."))]));
    let mut req = CanonicalRequest::builder(BACKEND, MODEL)
        .messages([
            Message::system("Be concise."),
            Message::user("I'm planning a trip."),
            Message::assistant("Where to?"),
            Message::user("Lisbon."),
            Message::user("Which museum should I visit?"),
        ])
        .build()
        .unwrap();

    let resp = h.orchestrator.complete(&mut req).await.unwrap();

    assert!(!resp.evidence_effective);
    assert!(resp.citations.is_empty());
    assert_eq!(resp.why_not_grounded, None);
    assert_eq!(resp.text, "Try the Gulbenkian.");

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].evidence_tools);
    assert_eq!(calls[0].messages.len(), 5);

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].outcome.is_ok());
    assert!(records[0].violations().is_empty());
}

#[tokio::test]
async fn auto_with_only_unlinked_evidence_succeeds() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(unlinked_only(
        "Several museums open until 21h on Fridays.",
    ))]));
    let mut req = request(EvidenceMode::Auto);

    let resp = h.orchestrator.complete(&mut req).await.unwrap();

    assert!(resp.evidence_effective);
    assert!(!resp.citations.is_empty());
    assert!(resp.citations.iter().all(|c| c.source_type == SourceType::Unlinked));
    assert_eq!(resp.why_not_grounded, None);
    assert_eq!(resp.backend_api_used, "openai.responses");

    let calls = h.backend.calls();
    assert!(calls[0].tools_enabled());

    let record = &h.sink.records()[0];
    assert!(record.evidence_effective);
    assert_eq!(record.citations.unlinked as usize, resp.citations.len());
    assert!(record.violations().is_empty());
}

#[tokio::test]
async fn required_with_only_unlinked_evidence_fails_closed() {
    let h = harness(
        ScriptedBackend::new(vec![Reply::Ok(unlinked_only("Several museums open late."))])
            .supporting_required(),
    );
    let mut req = request(EvidenceMode::Required);

    let err = h.orchestrator.complete(&mut req).await.unwrap_err();

    assert_eq!(err.code(), "EVIDENCE_REQUIRED_FAILED");
    assert_eq!(
        err.why_not_grounded(),
        Some(WhyNotGrounded::ToolsInvokedNoAnchoredEvidence)
    );
    let partial = err.partial_response().unwrap();
    assert!(!partial.citations.is_empty());
    assert_eq!(partial.anchored_count(), 0);

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome.code(), "EVIDENCE_REQUIRED_FAILED");
    assert_eq!(
        records[0].why_not_grounded,
        Some(WhyNotGrounded::ToolsInvokedNoAnchoredEvidence)
    );
}

#[tokio::test]
async fn structured_auto_call_runs_grounded_then_reshape() {
    let step1_text = "Museu do Oriente opens until 22h on Fridays.";
    let h = harness(ScriptedBackend::new(vec![
        Reply::Ok(anchored(step1_text)),
        Reply::Ok(plain(r#"{"museum":"Museu do Oriente","closes":"22:00"}"#)),
    ]));
    let schema = json!({
        "type": "object",
        "properties": { "museum": { "type": "string" }, "closes": { "type": "string" } },
        "required": ["museum", "closes"]
    });
    let mut req = CanonicalRequest::builder(BACKEND, MODEL)
        .message(Message::user("Which museum closes latest on Friday?"))
        .evidence_mode(EvidenceMode::Auto)
        .output_schema(schema.clone())
        .build()
        .unwrap();

    let resp = h.orchestrator.complete(&mut req).await.unwrap();

    let step2 = resp.step2.as_ref().unwrap();
    assert!(!step2.step2_tools_invoked);
    assert_eq!(step2.step2_source_ref, provenance::sha256_hex(step1_text));

    assert_eq!(resp.anchored_count(), 1);
    assert!(resp.evidence_effective);
    assert_eq!(
        resp.structured_output,
        Some(json!({ "museum": "Museu do Oriente", "closes": "22:00" }))
    );
    assert_eq!(resp.usage.total_tokens, 140);

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].tools_enabled());
    assert!(calls[0].response_schema.is_none());
    assert!(!calls[1].tools_enabled());
    assert_eq!(calls[1].response_schema, Some(schema));
    assert!(calls[1].messages.iter().any(|m| m.content == step1_text));

    assert!(h.sink.records()[0].two_step);
}

// ── Context, validation, evidence contract ───────────────────────────────

#[tokio::test]
async fn location_context_is_injected_once_and_mirrored() {
    let h = harness(ScriptedBackend::new(vec![
        Reply::Ok(plain("Nearby: MAAT.")),
        Reply::Ok(plain("Still MAAT.")),
    ]));
    let mut req = CanonicalRequest::builder(BACKEND, MODEL)
        .message(Message::system("Be concise."))
        .message(Message::user("Any museum nearby?"))
        .location_context("The user is in Belém, Lisbon.")
        .build()
        .unwrap();

    let resp = h.orchestrator.complete(&mut req).await.unwrap();
    h.orchestrator.complete(&mut req).await.unwrap();

    assert_eq!(req.location_context_count(), 1);
    let calls = h.backend.calls();
    for call in &calls {
        let kinds: Vec<_> = call.messages.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds.iter().filter(|k| **k == MessageKind::LocationContext).count(),
            1
        );
        assert!(call.messages[1].is_location_context());
    }

    let hash = provenance::sha256_hex("The user is in Belém, Lisbon.");
    assert_eq!(resp.metadata[provenance::LOCATION_CONTEXT_HASH], hash);
    assert_eq!(resp.metadata[provenance::LOCATION_CONTEXT_LENGTH], 29);

    let record = &h.sink.records()[0];
    assert!(record.location_context.present);
    assert_eq!(record.location_context.hash.as_deref(), Some(hash.as_str()));
}

#[tokio::test]
async fn caller_metadata_is_mirrored_onto_the_response() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(plain("ok"))]));
    let mut req = CanonicalRequest::builder(BACKEND, MODEL)
        .message(Message::user("hi"))
        .metadata("tenant", json!("acme"))
        .metadata(provenance::TRANSPORT_MODE_USED, json!("caller-value"))
        .build()
        .unwrap();

    let resp = h.orchestrator.complete(&mut req).await.unwrap();

    assert_eq!(resp.metadata["tenant"], "acme");
    // Keys the orchestrator sets itself are not overwritten.
    assert_eq!(resp.metadata[provenance::TRANSPORT_MODE_USED], "standard");
}

#[tokio::test]
async fn unknown_model_is_rejected_without_calling_the_backend() {
    let h = harness(ScriptedBackend::new(vec![]));
    let mut req = CanonicalRequest::builder(BACKEND, "mock-xl")
        .message(Message::user("hi"))
        .build()
        .unwrap();

    let err = h.orchestrator.complete(&mut req).await.unwrap_err();

    assert_eq!(err.code(), "UNKNOWN_MODEL");
    assert!(err.to_string().contains(MODEL));
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.sink.records()[0].outcome.code(), "UNKNOWN_MODEL");
}

#[tokio::test]
async fn unknown_backend_is_rejected() {
    let h = harness(ScriptedBackend::new(vec![]));
    let mut req = CanonicalRequest::builder("elsewhere", MODEL)
        .message(Message::user("hi"))
        .build()
        .unwrap();

    let err = h.orchestrator.complete(&mut req).await.unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_BACKEND");
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test]
async fn required_without_tool_use_on_unsupported_backend() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(plain("From memory: ..."))]));
    let mut req = request(EvidenceMode::Required);

    let err = h.orchestrator.complete(&mut req).await.unwrap_err();
    assert_eq!(
        err.why_not_grounded(),
        Some(WhyNotGrounded::BackendDoesNotSupportRequired)
    );
}

#[tokio::test]
async fn required_with_anchored_evidence_succeeds() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(anchored("Open until 22h."))]));
    let mut req = request(EvidenceMode::Required);

    let resp = h.orchestrator.complete(&mut req).await.unwrap();
    assert!(resp.evidence_effective);
    assert_eq!(resp.anchored_count(), 1);
    assert_eq!(resp.citations[0].source_domain, "museudooriente.pt");
}

#[tokio::test]
async fn auto_without_evidence_succeeds_with_reason() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(plain("I think the Gulbenkian."))]));
    let mut req = request(EvidenceMode::Auto);

    let resp = h.orchestrator.complete(&mut req).await.unwrap();
    assert!(!resp.evidence_effective);
    assert!(resp.citations.is_empty());
    assert_eq!(resp.why_not_grounded, Some(WhyNotGrounded::ToolNotInvoked));
}

#[tokio::test]
async fn auto_harvests_urls_from_text_when_tools_left_no_evidence() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(urls_in_text_only(
        "See https://www.visitlisboa.com/en/museums and https://museu.gulbenkian.pt/en/visit.",
    ))]));
    let mut req = request(EvidenceMode::Auto);

    let resp = h.orchestrator.complete(&mut req).await.unwrap();

    assert_eq!(resp.citations.len(), 2);
    assert!(resp.citations.iter().all(|c| c.source_type == SourceType::TextHarvest));
    assert!(resp.evidence_effective);
    assert_eq!(resp.why_not_grounded, None);
    assert_eq!(h.sink.records()[0].citations.text_harvest, 2);
}

#[tokio::test]
async fn required_never_surfaces_harvested_urls() {
    let h = harness(
        ScriptedBackend::new(vec![Reply::Ok(urls_in_text_only(
            "See https://www.visitlisboa.com/en/museums and https://museu.gulbenkian.pt/en/visit.",
        ))])
        .supporting_required(),
    );
    let mut req = request(EvidenceMode::Required);

    let err = h.orchestrator.complete(&mut req).await.unwrap_err();

    assert_eq!(err.code(), "EVIDENCE_REQUIRED_FAILED");
    assert_eq!(
        err.why_not_grounded(),
        Some(WhyNotGrounded::ToolsInvokedNoAnchoredEvidence)
    );
    let partial = err.partial_response().unwrap();
    assert!(
        partial
            .citations
            .iter()
            .all(|c| c.source_type != SourceType::TextHarvest)
    );
    assert_eq!(h.sink.records()[0].citations.text_harvest, 0);
}

// ── Deadlines ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn deadline_expiry_finalizes_with_tools_off() {
    let h = harness(ScriptedBackend::new(vec![
        Reply::Slow(Duration::from_secs(30), anchored("too late")),
        Reply::Ok(plain("Short answer: the Gulbenkian.")),
    ]));
    let mut req = request(EvidenceMode::Auto);

    let resp = h
        .orchestrator
        .complete_with_deadline(&mut req, Duration::from_secs(2))
        .await
        .unwrap();

    assert!(resp.finalized_after_deadline);
    assert_eq!(resp.text, "Short answer: the Gulbenkian.");
    assert!(!resp.evidence_effective);
    assert_eq!(resp.why_not_grounded, Some(WhyNotGrounded::ToolNotInvoked));

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[1].tools_enabled());
    assert!(calls[1].max_output_tokens <= h.orchestrator.settings().finalize_max_tokens);
    assert!(h.sink.records()[0].finalized_after_deadline);
}

#[tokio::test(start_paused = true)]
async fn failed_finalize_is_deadline_exceeded() {
    let h = harness(ScriptedBackend::new(vec![
        Reply::Slow(Duration::from_secs(30), plain("too late")),
        Reply::Err(BackendError::Api {
            status_code: 400,
            message: "bad".into(),
        }),
    ]));
    let mut req = request(EvidenceMode::None);

    let err = h
        .orchestrator
        .complete_with_deadline(&mut req, Duration::from_secs(2))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "DEADLINE_EXCEEDED");
    assert_eq!(h.sink.records()[0].outcome.code(), "DEADLINE_EXCEEDED");
}

#[tokio::test(start_paused = true)]
async fn deadline_bounds_the_wait_for_admission() {
    let h = harness_with_capacity(ScriptedBackend::new(vec![Reply::Ok(plain("ok"))]), 2_000);
    let mut req = request(EvidenceMode::None);

    // 1,920 of 2,000 tokens held: not even the output floor fits until the
    // window rolls over a minute from now.
    let _held = h
        .orchestrator
        .admission()
        .reserve(ReservationProfile::new(BACKEND, req.token_class(), 1_000, 600))
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = h
        .orchestrator
        .complete_with_deadline(&mut req, Duration::from_secs(2))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "DEADLINE_EXCEEDED");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.sink.records()[0].outcome.code(), "DEADLINE_EXCEEDED");
}

// ── Admission interplay ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rate_limits_are_retried() {
    let h = harness(ScriptedBackend::new(vec![
        Reply::Err(BackendError::RateLimited {
            retry_after: Some(Duration::from_millis(200)),
        }),
        Reply::Ok(plain("ok")),
    ]));
    let mut req = request(EvidenceMode::None);

    let resp = h.orchestrator.complete(&mut req).await.unwrap();
    assert_eq!(resp.text, "ok");
    assert_eq!(h.backend.calls().len(), 2);
}

#[tokio::test]
async fn actual_usage_is_released_to_the_ledger() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(plain("ok"))]));
    let mut req = request(EvidenceMode::None);

    h.orchestrator.complete(&mut req).await.unwrap();

    let health = h.orchestrator.admission_health();
    let lane = health.backends.iter().find(|b| b.backend == BACKEND).unwrap();
    assert_eq!(lane.ledger.remaining, CAPACITY - 70);
}

#[tokio::test]
async fn open_routed_circuit_degrades_to_standard() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(plain("ok"))]));
    let routed = Routing::new("eu-west", TransportMode::Routed);
    for _ in 0..AdmissionConfig::default().circuit.threshold {
        h.orchestrator.admission().circuit().record_failure(&routed);
    }
    let mut req = CanonicalRequest::builder(BACKEND, MODEL)
        .message(Message::user("hi"))
        .routing(routed)
        .build()
        .unwrap();

    let resp = h.orchestrator.complete(&mut req).await.unwrap();

    assert_eq!(resp.metadata[provenance::ROUTING_DEGRADED], true);
    assert_eq!(resp.metadata[provenance::TRANSPORT_MODE_USED], "standard");
    assert_eq!(h.backend.calls()[0].routing.transport_mode, TransportMode::Standard);
    assert!(h.sink.records()[0].routing_degraded);
}

#[tokio::test]
async fn open_standard_circuit_fails_fast() {
    let h = harness(ScriptedBackend::new(vec![Reply::Ok(plain("ok"))]));
    let standard = Routing::new("eu-west", TransportMode::Standard);
    for _ in 0..AdmissionConfig::default().circuit.threshold {
        h.orchestrator.admission().circuit().record_failure(&standard);
    }
    let mut req = CanonicalRequest::builder(BACKEND, MODEL)
        .message(Message::user("hi"))
        .routing(standard)
        .build()
        .unwrap();

    let err = h.orchestrator.complete(&mut req).await.unwrap_err();
    assert_eq!(err.code(), "CIRCUIT_OPEN");
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn trimmed_grant_reaches_the_backend_and_the_response() {
    let h = harness_with_capacity(ScriptedBackend::new(vec![Reply::Ok(plain("ok"))]), 2_000);
    let mut req = request(EvidenceMode::None);

    // 1,080 held leaves 920: the full 800-token request no longer fits.
    let _held = h
        .orchestrator
        .admission()
        .reserve(ReservationProfile::new(BACKEND, req.token_class(), 500, 400))
        .await
        .unwrap();

    let resp = h.orchestrator.complete(&mut req).await.unwrap();

    let trim = resp.trim_notice.as_ref().unwrap();
    assert_eq!(trim.requested_output_tokens, 800);
    assert!(trim.granted_output_tokens < 800);
    assert!(trim.granted_output_tokens >= AdmissionConfig::default().min_output_tokens);
    assert_eq!(h.backend.calls()[0].max_output_tokens, trim.granted_output_tokens);
    assert!(h.sink.records()[0].trim_notice.is_some());
}
