//! The request orchestrator: drives one call from canonical request to
//! canonical response.

use crate::catalog::ModelCatalog;
use crate::evidence;
use crate::protocol;
use groundgate_admission::{AdmissionController, AdmissionHealth, ReservationProfile, RouteDecision};
use groundgate_citations::NormalizeOptions;
use groundgate_config::{GatewayConfig, OrchestratorConfig};
use groundgate_core::{
    BackendCall, BackendClient, CanonicalRequest, CanonicalResponse, EvidenceMode, Error,
    RawBackendResponse, Result, Routing, provenance, tokens,
};
use groundgate_providers::BackendRegistry;
use groundgate_telemetry::{TelemetryRecord, TelemetrySink};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one bounded round trip.
enum Trip {
    Done(RawBackendResponse),
    Expired,
}

/// What the backend produced for one call.
struct Exchange {
    /// Step 1 (or the only round trip); citations come from here.
    grounded: RawBackendResponse,
    /// Step 2 of the grounded-then-reshape protocol.
    reshaped: Option<RawBackendResponse>,
    finalized: bool,
}

impl Exchange {
    fn text(&self) -> &str {
        self.reshaped
            .as_ref()
            .map_or(self.grounded.text.as_str(), |r| r.text.as_str())
    }
}

/// Turns canonical requests into canonical responses against the
/// configured backends.
pub struct Orchestrator {
    /// Backend clients by name
    backends: BackendRegistry,

    /// Model allow-lists
    catalog: ModelCatalog,

    /// Shared admission state (ledger, circuits, retry policy)
    admission: Arc<AdmissionController>,

    /// Where one record per call goes
    telemetry: Arc<dyn TelemetrySink>,

    settings: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        backends: BackendRegistry,
        catalog: ModelCatalog,
        admission: Arc<AdmissionController>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            backends,
            catalog,
            admission,
            telemetry,
            settings: OrchestratorConfig::default(),
        }
    }

    /// Build clients, controller and sink from a validated configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let backends = groundgate_providers::build_from_config(config)?;
        let telemetry = groundgate_telemetry::build_sink(&config.telemetry).map_err(|e| {
            Error::Config {
                message: e.to_string(),
            }
        })?;
        let admission = Arc::new(AdmissionController::from_config(config));
        Ok(Self::new(
            backends,
            ModelCatalog::from_config(config),
            admission,
            telemetry,
        )
        .with_settings(config.orchestrator.clone()))
    }

    pub fn with_settings(mut self, settings: OrchestratorConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &OrchestratorConfig {
        &self.settings
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Ledger, lane and circuit state for every backend.
    pub fn admission_health(&self) -> AdmissionHealth {
        self.admission.health()
    }

    /// Run a call under the configured default deadline.
    pub async fn complete(&self, request: &mut CanonicalRequest) -> Result<CanonicalResponse> {
        let deadline = Duration::from_secs(self.settings.call_timeout_secs);
        self.complete_with_deadline(request, deadline).await
    }

    /// Run a call. `deadline` bounds admission and the backend round
    /// trips; when it expires during a round trip a single finalize round
    /// trip is attempted.
    ///
    /// Emits exactly one telemetry record whatever the outcome.
    pub async fn complete_with_deadline(
        &self,
        request: &mut CanonicalRequest,
        deadline: Duration,
    ) -> Result<CanonicalResponse> {
        let started = Instant::now();
        let until = started + deadline;
        let mut record = TelemetryRecord::new(
            request.backend(),
            request.model_id(),
            request.evidence_mode(),
        )
        .with_context(request.location_context());

        let result = self.run(request, until, deadline, &mut record).await;

        match &result {
            Ok(response) => record.record_response(response),
            Err(e) => record.record_error(e),
        }
        record.finish(started.elapsed());

        match &result {
            Ok(response) => info!(
                call_id = %record.call_id,
                backend = %response.backend,
                model = %response.model,
                evidence_effective = response.evidence_effective,
                citations = response.citations.len(),
                tokens = response.usage.total_tokens,
                latency_ms = record.latency_ms,
                "Call completed"
            ),
            Err(e) => warn!(
                call_id = %record.call_id,
                backend = request.backend(),
                code = e.code(),
                error = %e,
                latency_ms = record.latency_ms,
                "Call failed"
            ),
        }

        self.telemetry.emit(record);
        result
    }

    /// Emit the record for a call rejected before it became a canonical
    /// request, e.g. an oversized location context at the HTTP edge.
    pub fn record_rejected(&self, backend: &str, model: &str, mode: EvidenceMode, error: &Error) {
        let mut record = TelemetryRecord::new(backend, model, mode);
        record.record_error(error);
        record.finish(Duration::ZERO);
        warn!(
            call_id = %record.call_id,
            backend,
            code = error.code(),
            error = %error,
            "Call rejected"
        );
        self.telemetry.emit(record);
    }

    async fn run(
        &self,
        request: &mut CanonicalRequest,
        until: Instant,
        deadline: Duration,
        record: &mut TelemetryRecord,
    ) -> Result<CanonicalResponse> {
        if request.apply_location_context() {
            debug!(
                backend = request.backend(),
                chars = request.location_context().map_or(0, |c| c.char_len()),
                "Location context applied"
            );
        }

        self.catalog.check(request.backend(), request.model_id())?;
        let client = self
            .backends
            .get(request.backend())
            .ok_or_else(|| Error::UnknownBackend {
                backend: request.backend().to_string(),
                configured: self.backends.names(),
            })?;

        let (routing, degraded) = match self.admission.route(request.routing()) {
            RouteDecision::Proceed(routing) => (routing, false),
            RouteDecision::Degrade { from, to } => {
                warn!(
                    region = %from.region,
                    from = %from.transport_mode,
                    to = %to.transport_mode,
                    "Circuit open, degrading transport"
                );
                (to, true)
            }
            RouteDecision::Reject(routing) => {
                return Err(Error::CircuitOpen {
                    region: routing.region,
                    transport_mode: routing.transport_mode.to_string(),
                });
            }
        };
        record.routing_degraded = degraded;

        let mut profile = ReservationProfile::for_request(request);
        if request.needs_two_step() {
            // The reshape step reads step 1's answer and the schema.
            let schema_tokens = request
                .output_schema()
                .map_or(0, |s| tokens::estimate_tokens(&s.to_string()));
            profile.estimated_input_tokens = profile
                .estimated_input_tokens
                .saturating_add(request.max_output_tokens())
                .saturating_add(schema_tokens);
        }
        // Nothing has reached the backend yet, so expiry here cannot finalize.
        let reservation = match tokio::time::timeout_at(until, self.admission.reserve(profile)).await {
            Ok(reservation) => reservation?,
            Err(_) => {
                let deadline_ms = deadline.as_millis() as u64;
                warn!(backend = request.backend(), deadline_ms, "Deadline expired waiting for admission");
                return Err(Error::DeadlineExceeded { deadline_ms });
            }
        };
        record.class_multipliers = reservation.multipliers().clone();
        let granted = reservation.granted_output_tokens();

        // Failed round trips leave the reservation charged.
        let exchange = self
            .invoke(&client, request, &routing, granted, until, deadline)
            .await?;

        let mode = request.evidence_mode();
        let citations = if mode.gathers_evidence() {
            let opts = NormalizeOptions::new(client.name())
                .with_harvest(mode == EvidenceMode::Auto)
                .with_harvest_limits(
                    self.settings.harvest_max_urls,
                    Duration::from_millis(self.settings.harvest_budget_ms),
                );
            groundgate_citations::normalize(&exchange.grounded, client.kind(), &opts)
        } else {
            Vec::new()
        };

        let assessment = evidence::assess(
            mode,
            exchange.grounded.tool_call_count,
            &citations,
            client.supports_required_tools(),
        );

        let usage = match &exchange.reshaped {
            Some(step2) => exchange.grounded.usage.combined(step2.usage),
            None => exchange.grounded.usage,
        };
        let text = exchange.text().to_string();
        let structured_output = request
            .output_schema()
            .and_then(|_| protocol::parse_structured(&text));
        if request.output_schema().is_some() && structured_output.is_none() {
            warn!(backend = client.name(), "Structured answer did not parse as JSON");
        }
        let backend_api_used = exchange
            .grounded
            .api_used
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| client.api_surface().to_string());

        let mut metadata = Map::new();
        metadata.insert(
            provenance::TRANSPORT_MODE_USED.into(),
            Value::String(routing.transport_mode.as_str().into()),
        );
        if degraded {
            metadata.insert(provenance::ROUTING_DEGRADED.into(), Value::Bool(true));
        }
        let mirrored = protocol::mirror_provenance(&request.metadata, &mut metadata);
        debug!(mirrored, "Provenance mirrored");

        let response = CanonicalResponse {
            text,
            structured_output,
            evidence_effective: assessment.evidence_effective,
            citations,
            backend_api_used,
            backend: client.name().to_string(),
            model: request.model_id().to_string(),
            usage,
            tool_calls: exchange.grounded.tool_call_count,
            why_not_grounded: assessment.why_not_grounded,
            step2: exchange
                .reshaped
                .as_ref()
                .map(|_| protocol::step2_record(&exchange.grounded.text)),
            trim_notice: reservation.trim_notice().cloned(),
            finalized_after_deadline: exchange.finalized,
            metadata,
        };

        reservation.release(u64::from(usage.total_tokens));

        if let Some(reason) = assessment.required_failure {
            warn!(
                backend = %response.backend,
                reason = %reason,
                tool_calls = response.tool_calls,
                citations = response.citations.len(),
                "Evidence required but not produced"
            );
            return Err(Error::EvidenceRequiredFailed {
                reason,
                response: Box::new(response),
            });
        }
        Ok(response)
    }

    /// One round trip, or two for grounded-then-reshape.
    async fn invoke(
        &self,
        client: &Arc<dyn BackendClient>,
        request: &CanonicalRequest,
        routing: &Routing,
        granted: u32,
        until: Instant,
        deadline: Duration,
    ) -> Result<Exchange> {
        let call = protocol::grounded_call(request, routing.clone(), granted);

        let grounded = match self.round_trip(client, routing, &call, until).await? {
            Trip::Done(raw) => raw,
            Trip::Expired => {
                // The finalize answer stands in for both steps.
                let schema = request.output_schema().cloned();
                let raw = self.finalize(client, &call, schema, deadline).await?;
                return Ok(Exchange {
                    grounded: raw,
                    reshaped: None,
                    finalized: true,
                });
            }
        };

        let Some(schema) = request.output_schema().filter(|_| request.needs_two_step()) else {
            return Ok(Exchange {
                grounded,
                reshaped: None,
                finalized: false,
            });
        };

        debug!(
            backend = client.name(),
            step1_chars = grounded.text.len(),
            "Reshaping grounded answer"
        );
        let reshape = protocol::reshape_call(
            request,
            &grounded.text,
            schema.clone(),
            routing.clone(),
            granted,
        );
        let (reshaped, finalized) = match self.round_trip(client, routing, &reshape, until).await? {
            Trip::Done(raw) => (raw, false),
            Trip::Expired => (self.finalize(client, &reshape, None, deadline).await?, true),
        };
        Ok(Exchange {
            grounded,
            reshaped: Some(reshaped),
            finalized,
        })
    }

    /// A call through the controller's retry policy, bounded by `until`.
    async fn round_trip(
        &self,
        client: &Arc<dyn BackendClient>,
        routing: &Routing,
        call: &BackendCall,
        until: Instant,
    ) -> Result<Trip> {
        let attempts = self.admission.execute(routing, |attempt| {
            let client = Arc::clone(client);
            let call = call.clone();
            async move {
                debug!(attempt, backend = client.name(), tools = call.tools_enabled(), "Invoking backend");
                client.invoke(call).await
            }
        });
        match tokio::time::timeout_at(until, attempts).await {
            Ok(result) => Ok(Trip::Done(result?)),
            Err(_) => Ok(Trip::Expired),
        }
    }

    async fn finalize(
        &self,
        client: &Arc<dyn BackendClient>,
        call: &BackendCall,
        schema: Option<Value>,
        deadline: Duration,
    ) -> Result<RawBackendResponse> {
        let deadline_ms = deadline.as_millis() as u64;
        if !self.settings.finalize_on_deadline {
            return Err(Error::DeadlineExceeded { deadline_ms });
        }

        warn!(backend = client.name(), deadline_ms, "Deadline expired, attempting finalize");
        let call = protocol::finalize_call(call, self.settings.finalize_max_tokens, schema);
        let budget = Duration::from_secs(self.settings.finalize_timeout_secs);
        match tokio::time::timeout(budget, client.invoke(call)).await {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(e)) => {
                warn!(backend = client.name(), error = %e, "Finalize round trip failed");
                Err(Error::DeadlineExceeded { deadline_ms })
            }
            Err(_) => {
                warn!(backend = client.name(), "Finalize round trip timed out");
                Err(Error::DeadlineExceeded { deadline_ms })
            }
        }
    }
}
