//! # GroundGate Admission
//!
//! Decides when, and with how many output tokens, a backend call may
//! start. Each backend gets its own lane: a token ledger over a rolling
//! window, an exclusive lock for heavy classes and a small slot pool for
//! everything else. A circuit breaker keyed by (region, transport mode)
//! and a retry policy wrap the call itself via
//! [`AdmissionController::execute`].
//!
//! The controller is an explicit instance shared by `Arc`; there is no
//! global state.

pub mod circuit;
pub mod controller;
pub mod ledger;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitSnapshot, RouteDecision};
pub use controller::{
    AdmissionController, AdmissionHealth, BackendHealth, Reservation, ReservationProfile,
};
pub use ledger::LedgerSnapshot;
pub use retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("backend '{backend}' has no admission lane (configured: {})", .configured.join(", "))]
    UnknownBackend {
        backend: String,
        configured: Vec<String>,
    },

    #[error("request needs {needed} tokens but backend '{backend}' allows {capacity} per window")]
    ExceedsCapacity {
        backend: String,
        needed: u64,
        capacity: u64,
    },

    #[error("admission controller is shut down")]
    Closed,
}

impl From<AdmissionError> for groundgate_core::Error {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::UnknownBackend {
                backend,
                configured,
            } => Self::UnknownBackend {
                backend,
                configured,
            },
            AdmissionError::ExceedsCapacity {
                backend,
                needed,
                capacity,
            } => Self::Capacity {
                backend,
                requested: needed,
                capacity,
            },
            closed @ AdmissionError::Closed => Self::Internal(closed.to_string()),
        }
    }
}
