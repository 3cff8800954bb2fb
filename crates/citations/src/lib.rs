//! # GroundGate Citations
//!
//! Reconciles the evidence shapes different backends (and SDK versions)
//! return into one list of [`CanonicalCitation`]s.
//!
//! Normalization is an ordered pipeline of independent [`Strategy`]s. The
//! first strategy that yields at least one resolvable citation wins:
//!
//! 1. [`DirectFieldScan`]: the backend's declarative (path, shape) rule
//!    table followed by the generic tail, with JOIN resolution for
//!    id-only citation entries.
//! 2. [`SiblingScan`]: candidate-level `citationMetadata`.
//! 3. [`TextHarvest`]: URLs scraped from the answer text, only when tools
//!    ran and the caller allows it.
//!
//! Every candidate then goes through redirect handling and domain
//! resolution; the result is deduplicated by normalized URL. Every
//! returned citation has a non-empty `source_domain`.

pub mod harvest;
pub mod path;
pub mod redirect;
pub mod resolve;
pub mod rules;
pub mod shapes;
pub mod urlnorm;

use groundgate_core::{BackendKind, CanonicalCitation, RawBackendResponse, SourceType};
use shapes::Candidate;
use std::time::Duration;
use tracing::debug;

pub use rules::{Rule, rules_for};
pub use shapes::Shape;

/// Per-call normalization settings.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Backend name stamped on every citation.
    pub source: String,
    /// Text harvest is an `auto`-mode fallback; never enabled for `required`.
    pub allow_harvest: bool,
    pub harvest_max_urls: usize,
    pub harvest_budget: Duration,
}

impl NormalizeOptions {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            allow_harvest: false,
            harvest_max_urls: 8,
            harvest_budget: Duration::from_millis(50),
        }
    }

    pub fn with_harvest(mut self, allow: bool) -> Self {
        self.allow_harvest = allow;
        self
    }

    pub fn with_harvest_limits(mut self, max_urls: usize, budget: Duration) -> Self {
        self.harvest_max_urls = max_urls;
        self.harvest_budget = budget;
        self
    }
}

/// One independent extraction strategy.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(
        &self,
        raw: &RawBackendResponse,
        kind: BackendKind,
        opts: &NormalizeOptions,
    ) -> Vec<Candidate>;
}

/// Probe the backend's rule table and the generic tail.
pub struct DirectFieldScan;

impl Strategy for DirectFieldScan {
    fn name(&self) -> &'static str {
        "direct_field_scan"
    }

    fn extract(
        &self,
        raw: &RawBackendResponse,
        kind: BackendKind,
        _opts: &NormalizeOptions,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        for rule in rules_for(kind) {
            for node in path::resolve(&raw.body, rule.path) {
                rule.shape.extract(node, &mut out);
            }
        }
        out
    }
}

/// Citation metadata one level up, next to the grounding data.
pub struct SiblingScan;

impl Strategy for SiblingScan {
    fn name(&self) -> &'static str {
        "sibling_scan"
    }

    fn extract(
        &self,
        raw: &RawBackendResponse,
        _kind: BackendKind,
        _opts: &NormalizeOptions,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        for rule in rules::SIBLING {
            for node in path::resolve(&raw.body, rule.path) {
                rule.shape.extract(node, &mut out);
            }
        }
        out
    }
}

/// URLs recovered from the answer text.
pub struct TextHarvest;

impl Strategy for TextHarvest {
    fn name(&self) -> &'static str {
        "text_harvest"
    }

    fn extract(
        &self,
        raw: &RawBackendResponse,
        _kind: BackendKind,
        opts: &NormalizeOptions,
    ) -> Vec<Candidate> {
        if !opts.allow_harvest || raw.tool_call_count == 0 {
            return Vec::new();
        }
        harvest::harvest_urls(&raw.text, opts.harvest_max_urls, opts.harvest_budget)
            .into_iter()
            .map(|url| {
                let raw = serde_json::json!({ "harvested_from": "text", "url": url });
                Candidate::from_url(&url, SourceType::TextHarvest, raw)
            })
            .collect()
    }
}

/// The default pipeline, in order.
pub fn pipeline() -> [&'static dyn Strategy; 3] {
    [&DirectFieldScan, &SiblingScan, &TextHarvest]
}

/// Normalize a raw backend response into canonical citations.
///
/// Pure: no I/O, no shared state.
pub fn normalize(
    raw: &RawBackendResponse,
    kind: BackendKind,
    opts: &NormalizeOptions,
) -> Vec<CanonicalCitation> {
    for strategy in pipeline() {
        let candidates = strategy.extract(raw, kind, opts);
        if candidates.is_empty() {
            continue;
        }
        let found = candidates.len();
        let mut citations: Vec<CanonicalCitation> = candidates
            .into_iter()
            .filter_map(|c| resolve::resolve(c, &opts.source))
            .collect();
        if citations.is_empty() {
            debug!(strategy = strategy.name(), found, "no candidate had a derivable domain");
            continue;
        }
        citations = resolve::dedup(citations);
        citations.retain(|c| !c.source_domain.is_empty());
        debug!(
            strategy = strategy.name(),
            backend = %opts.source,
            found,
            kept = citations.len(),
            "normalized citations"
        );
        return citations;
    }
    Vec::new()
}
