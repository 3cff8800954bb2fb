//! Per-call telemetry for GroundGate.
//!
//! The orchestrator emits exactly one [`TelemetryRecord`] per call, on
//! success and on failure, through a [`TelemetrySink`]. Records carry
//! evidence outcome, citation counts by type, location-context presence
//! (hash and length, never the text), token usage and latency.

pub mod model;
pub mod sink;

use groundgate_config::TelemetryConfig;
use std::sync::Arc;

pub use model::{
    CitationCounts, ContextInfo, Outcome, TelemetryRecord, TelemetrySummary, Violation,
};
pub use sink::{ChannelSink, LogSink, MemorySink, NoopSink, TelemetrySink};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown telemetry sink: {0}")]
    UnknownSink(String),
}

/// Build the sink named in configuration.
pub fn build_sink(config: &TelemetryConfig) -> Result<Arc<dyn TelemetrySink>, TelemetryError> {
    if !config.enabled {
        return Ok(Arc::new(NoopSink));
    }
    match config.sink.as_str() {
        "log" => Ok(Arc::new(LogSink)),
        "none" => Ok(Arc::new(NoopSink)),
        other => Err(TelemetryError::UnknownSink(other.to_string())),
    }
}
