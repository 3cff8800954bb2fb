//! Telemetry sinks.
//!
//! Emission is fire-and-forget: [`TelemetrySink::emit`] never blocks the
//! call path and never fails it.

use crate::model::{TelemetryRecord, TelemetrySummary};
use std::collections::VecDeque;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Destination for per-call records.
pub trait TelemetrySink: Send + Sync {
    fn name(&self) -> &str;

    fn emit(&self, record: TelemetryRecord);
}

/// Writes each record as one structured `tracing` event.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn emit(&self, record: TelemetryRecord) {
        let violations = record.violations();
        for v in &violations {
            warn!(call_id = %record.call_id, violation = %v, "Telemetry invariant violated");
        }
        info!(
            target: "groundgate::telemetry",
            call_id = %record.call_id,
            backend = %record.backend,
            model = %record.model,
            evidence_mode = %record.evidence_mode_requested,
            evidence_effective = record.evidence_effective,
            backend_api_used = record.backend_api_used.as_deref().unwrap_or("-"),
            anchored = record.citations.anchored,
            unlinked = record.citations.unlinked,
            text_harvest = record.citations.text_harvest,
            why_not_grounded = record.why_not_grounded.map(|w| w.as_str()).unwrap_or("-"),
            context_present = record.location_context.present,
            context_length = record.location_context.length,
            input_tokens = record.usage.input_tokens,
            output_tokens = record.usage.output_tokens,
            latency_ms = record.latency_ms,
            outcome = record.outcome.code(),
            two_step = record.two_step,
            trimmed = record.trim_notice.is_some(),
            routing_degraded = record.routing_degraded,
            "Call completed"
        );
    }
}

/// Discards every record.
#[derive(Debug, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn name(&self) -> &str {
        "none"
    }

    fn emit(&self, _record: TelemetryRecord) {}
}

/// Keeps the most recent records in memory for inspection and tests.
pub struct MemorySink {
    capacity: usize,
    records: RwLock<VecDeque<TelemetryRecord>>,
}

impl MemorySink {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: RwLock::new(VecDeque::new()),
        }
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().cloned().collect()
    }

    /// Up to `limit` most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<TelemetryRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn find(&self, call_id: &str) -> Option<TelemetryRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.iter().find(|r| r.call_id == call_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> TelemetrySummary {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        TelemetrySummary::from_records(records.iter())
    }

    pub fn clear(&self) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn emit(&self, record: TelemetryRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }
}

/// Forwards records to an external collector over a bounded channel.
///
/// A full or closed channel drops the record with a warning.
pub struct ChannelSink {
    tx: mpsc::Sender<TelemetryRecord>,
}

impl ChannelSink {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<TelemetryRecord>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<TelemetryRecord>) -> Self {
        Self { tx }
    }
}

impl TelemetrySink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    fn emit(&self, record: TelemetryRecord) {
        if let Err(e) = self.tx.try_send(record) {
            let (reason, record) = match e {
                mpsc::error::TrySendError::Full(r) => ("full", r),
                mpsc::error::TrySendError::Closed(r) => ("closed", r),
            };
            warn!(call_id = %record.call_id, reason, "Telemetry record dropped");
        }
    }
}
