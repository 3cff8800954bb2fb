//! Mapping of gateway errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use groundgate_core::{CanonicalResponse, Error, WhyNotGrounded};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub why_not_grounded: Option<WhyNotGrounded>,
    /// Assembled answer and evidence when an evidence contract failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<CanonicalResponse>,
}

/// An orchestrator error on its way to the caller.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

/// HTTP status for a machine-readable error code.
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "CONTEXT_TOO_LONG" | "INVALID_REQUEST" | "UNKNOWN_BACKEND" | "UNKNOWN_MODEL" => {
            StatusCode::BAD_REQUEST
        }
        "EVIDENCE_REQUIRED_FAILED" => StatusCode::UNPROCESSABLE_ENTITY,
        "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
        "TRANSPORT_ERROR" | "BACKEND_ERROR" | "AUTH_FAILED" => StatusCode::BAD_GATEWAY,
        "CIRCUIT_OPEN" => StatusCode::SERVICE_UNAVAILABLE,
        "DEADLINE_EXCEEDED" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);
        let why_not_grounded = self.0.why_not_grounded();
        let message = self.0.to_string();
        let response = match self.0 {
            Error::EvidenceRequiredFailed { response, .. } => Some(*response),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message,
                why_not_grounded,
                response,
            },
        };
        (status, Json(body)).into_response()
    }
}
