//! The request orchestrator.
//!
//! Each call follows a fixed sequence of stages:
//!
//! 1. **Inject** the location context as a preamble (once per request)
//! 2. **Validate** backend and model against the allow-list
//! 3. **Route and reserve** through the admission controller
//! 4. **Invoke** the backend: one round trip, or grounded-then-reshape
//!    when a schema meets an evidence mode
//! 5. **Normalize** citations from the grounded round trip
//! 6. **Post-validate** the evidence contract (`required` fails closed)
//! 7. **Mirror** provenance, **release** the reservation with actual
//!    usage and emit one telemetry record
//!
//! The caller deadline bounds the backend round trips. When it expires a
//! single short finalize round trip with tools off is attempted before
//! giving up with `DEADLINE_EXCEEDED`.

pub mod catalog;
pub mod evidence;
pub mod orchestrator;
pub mod protocol;

pub use catalog::ModelCatalog;
pub use evidence::{Assessment, ToolPlan};
pub use orchestrator::Orchestrator;
