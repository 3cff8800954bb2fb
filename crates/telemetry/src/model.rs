//! Data model for per-call telemetry records.

use chrono::{DateTime, Utc};
use groundgate_core::{
    CanonicalResponse, Error, EvidenceMode, LocationContext, SourceType, TokenUsage, TrimNotice,
    WhyNotGrounded,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

// ── Outcome ───────────────────────────────────────────────────────────────

/// How the call ended, from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Error { code: String },
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Ok => "OK",
            Self::Error { code } => code,
        }
    }
}

// ── Counts ────────────────────────────────────────────────────────────────

/// Citation counts by source type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationCounts {
    pub anchored: u32,
    pub unlinked: u32,
    pub text_harvest: u32,
}

impl CitationCounts {
    pub fn from_response(response: &CanonicalResponse) -> Self {
        let count = |t: SourceType| response.count(t) as u32;
        Self {
            anchored: count(SourceType::Anchored),
            unlinked: count(SourceType::Unlinked),
            text_harvest: count(SourceType::TextHarvest),
        }
    }

    pub fn total(&self) -> u32 {
        self.anchored + self.unlinked + self.text_harvest
    }
}

/// Location-context presence; the text itself is never logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub length: usize,
}

impl ContextInfo {
    pub fn from_context(ctx: Option<&LocationContext>) -> Self {
        match ctx {
            Some(ctx) => Self {
                present: true,
                hash: Some(ctx.hash()),
                length: ctx.char_len(),
            },
            None => Self::default(),
        }
    }
}

// ── Record ────────────────────────────────────────────────────────────────

/// One record per orchestrated call, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
    pub backend: String,
    pub model: String,
    pub evidence_mode_requested: EvidenceMode,
    pub evidence_effective: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_api_used: Option<String>,
    pub citations: CitationCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why_not_grounded: Option<WhyNotGrounded>,
    pub location_context: ContextInfo,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    /// Class multipliers at call time, keyed `"<evidence_mode>/<context_policy>"`.
    #[serde(default)]
    pub class_multipliers: BTreeMap<String, f64>,
    pub outcome: Outcome,
    pub two_step: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_notice: Option<TrimNotice>,
    pub routing_degraded: bool,
    #[serde(default)]
    pub finalized_after_deadline: bool,
}

impl TelemetryRecord {
    /// Start a record for a call; everything else defaults to "nothing
    /// happened yet".
    pub fn new(backend: impl Into<String>, model: impl Into<String>, mode: EvidenceMode) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            backend: backend.into(),
            model: model.into(),
            evidence_mode_requested: mode,
            evidence_effective: false,
            backend_api_used: None,
            citations: CitationCounts::default(),
            why_not_grounded: None,
            location_context: ContextInfo::default(),
            usage: TokenUsage::default(),
            latency_ms: 0,
            class_multipliers: BTreeMap::new(),
            outcome: Outcome::Ok,
            two_step: false,
            trim_notice: None,
            routing_degraded: false,
            finalized_after_deadline: false,
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_context(mut self, ctx: Option<&LocationContext>) -> Self {
        self.location_context = ContextInfo::from_context(ctx);
        self
    }

    pub fn with_multipliers(mut self, multipliers: BTreeMap<String, f64>) -> Self {
        self.class_multipliers = multipliers;
        self
    }

    /// Copy what the response says about evidence, usage and routing.
    pub fn record_response(&mut self, response: &CanonicalResponse) {
        self.evidence_effective = response.evidence_effective;
        self.backend_api_used = Some(response.backend_api_used.clone());
        self.citations = CitationCounts::from_response(response);
        self.why_not_grounded = response.why_not_grounded;
        self.usage = response.usage;
        self.two_step = response.step2.is_some();
        self.trim_notice = response.trim_notice.clone();
        self.finalized_after_deadline = response.finalized_after_deadline;
        self.routing_degraded = response
            .metadata
            .get(groundgate_core::provenance::ROUTING_DEGRADED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
    }

    /// Mark the call failed. A partial response carried by the error (an
    /// evidence-required failure) is recorded as well.
    pub fn record_error(&mut self, error: &Error) {
        if let Some(partial) = error.partial_response() {
            self.record_response(partial);
        }
        if let Some(reason) = error.why_not_grounded() {
            self.why_not_grounded = Some(reason);
        }
        self.outcome = Outcome::Error {
            code: error.code().to_string(),
        };
    }

    pub fn finish(&mut self, latency: Duration) {
        self.latency_ms = latency.as_millis() as u64;
    }

    /// Invariants every record must satisfy. An empty list is healthy.
    pub fn violations(&self) -> Vec<Violation> {
        let mut out = Vec::new();
        if self.evidence_effective {
            if self.backend_api_used.as_deref().is_none_or(str::is_empty) {
                out.push(Violation::EvidenceWithoutApiSurface);
            }
            if self.citations.total() == 0 {
                out.push(Violation::EvidenceWithoutCitations);
            }
        }
        if self.evidence_mode_requested == EvidenceMode::Required
            && self.outcome.is_ok()
            && self.citations.anchored == 0
        {
            out.push(Violation::RequiredWithoutAnchors);
        }
        if self.location_context.present && self.location_context.hash.is_none() {
            out.push(Violation::ContextWithoutHash);
        }
        out
    }
}

/// A broken telemetry invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    EvidenceWithoutApiSurface,
    EvidenceWithoutCitations,
    RequiredWithoutAnchors,
    ContextWithoutHash,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::EvidenceWithoutApiSurface => "evidence-bearing call has no backend_api_used",
            Self::EvidenceWithoutCitations => "evidence_effective set with zero citations",
            Self::RequiredWithoutAnchors => "required-evidence call succeeded without anchored citations",
            Self::ContextWithoutHash => "location context present without a hash",
        };
        f.write_str(msg)
    }
}

// ── Summary ───────────────────────────────────────────────────────────────

/// Aggregate over a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub calls: u64,
    pub ok: u64,
    /// Error counts keyed by error code.
    pub errors: BTreeMap<String, u64>,
    pub evidence_requested: u64,
    pub evidence_effective: u64,
    pub anchored_citations: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: u64,
    pub violations: u64,
}

impl TelemetrySummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TelemetryRecord>) -> Self {
        let mut s = Self::default();
        let mut latency_total = 0u64;
        for r in records {
            s.calls += 1;
            match &r.outcome {
                Outcome::Ok => s.ok += 1,
                Outcome::Error { code } => *s.errors.entry(code.clone()).or_default() += 1,
            }
            if r.evidence_mode_requested.gathers_evidence() {
                s.evidence_requested += 1;
            }
            if r.evidence_effective {
                s.evidence_effective += 1;
            }
            s.anchored_citations += r.citations.anchored as u64;
            s.total_tokens += r.usage.total_tokens as u64;
            s.violations += r.violations().len() as u64;
            latency_total += r.latency_ms;
        }
        if s.calls > 0 {
            s.avg_latency_ms = latency_total / s.calls;
        }
        s
    }
}
