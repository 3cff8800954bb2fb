//! Error types for the gateway.
//!
//! Uses `thiserror` for ergonomic error definitions. Every caller-visible
//! failure maps to a stable machine-readable code via [`Error::code`].

use crate::response::{CanonicalResponse, WhyNotGrounded};
use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all gateway operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Request construction ---
    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    // --- Model validation ---
    #[error("Unknown backend '{backend}'; configured backends: {}", .configured.join(", "))]
    UnknownBackend {
        backend: String,
        configured: Vec<String>,
    },

    #[error(
        "Model '{model}' is not allowed on backend '{backend}'; choose one of: {}",
        .allowed.join(", ")
    )]
    UnknownModel {
        backend: String,
        model: String,
        allowed: Vec<String>,
    },

    // --- Evidence contract ---
    #[error("Evidence required but not produced: {reason}")]
    EvidenceRequiredFailed {
        reason: WhyNotGrounded,
        response: Box<CanonicalResponse>,
    },

    // --- Backend / transport ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Circuit open for region '{region}' ({transport_mode}) and no safer route exists")]
    CircuitOpen {
        region: String,
        transport_mode: String,
    },

    #[error(
        "Request needs {requested} tokens but backend '{backend}' only allows {capacity} per window"
    )]
    Capacity {
        backend: String,
        requested: u64,
        capacity: u64,
    },

    #[error("Deadline of {deadline_ms}ms exceeded and finalize attempt failed")]
    DeadlineExceeded { deadline_ms: u64 },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Request(e) => e.code(),
            Self::UnknownBackend { .. } => "UNKNOWN_BACKEND",
            Self::UnknownModel { .. } => "UNKNOWN_MODEL",
            Self::EvidenceRequiredFailed { .. } => "EVIDENCE_REQUIRED_FAILED",
            Self::Backend(e) => e.code(),
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::Capacity { .. } => "RATE_LIMITED",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::Config { .. } | Self::Serialization(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    /// Reason code for evidence-contract failures.
    pub fn why_not_grounded(&self) -> Option<WhyNotGrounded> {
        match self {
            Self::EvidenceRequiredFailed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// The response assembled before the call failed closed, if any.
    pub fn partial_response(&self) -> Option<&CanonicalResponse> {
        match self {
            Self::EvidenceRequiredFailed { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Rejections raised while building a [`crate::CanonicalRequest`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("Location context is {length} characters; the maximum is {max}")]
    ContextTooLong { length: usize, max: usize },

    #[error("Location context is empty")]
    EmptyLocationContext,

    #[error("Request has no messages")]
    EmptyMessages,

    #[error("Temperature {0} is outside 0.0..=2.0")]
    InvalidTemperature(f32),

    #[error("max_output_tokens must be at least 1")]
    InvalidMaxOutputTokens,
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ContextTooLong { .. } => "CONTEXT_TOO_LONG",
            _ => "INVALID_REQUEST",
        }
    }
}

/// What went wrong on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Connect,
    Interrupted,
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connect => write!(f, "connect"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Failures reported by a backend client.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Rate limited by backend{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transport failure ({kind}): {message}")]
    Transport {
        kind: TransportFailure,
        message: String,
    },

    #[error("API request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}ms", d.as_millis()),
        None => String::new(),
    }
}

impl BackendError {
    pub fn transport(kind: TransportFailure, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-supplied delay, when the backend sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Transport { .. } => "TRANSPORT_ERROR",
            Self::Auth(_) => "AUTH_FAILED",
            Self::Api { .. } | Self::InvalidResponse(_) => "BACKEND_ERROR",
            Self::NotConfigured(_) => "INTERNAL",
        }
    }
}
