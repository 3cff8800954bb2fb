//! HTTP API gateway for GroundGate.
//!
//! Exposes the orchestrator over REST:
//! - `POST /v1/complete`: one canonical completion
//! - `GET /v1/admission`: ledger, lane and circuit state
//! - `GET /health`: liveness and configured backends
//!
//! Built on Axum for high performance async HTTP.

pub mod error;
pub mod wire;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use groundgate_admission::AdmissionHealth;
use groundgate_config::GatewayConfig;
use groundgate_core::{CanonicalResponse, Error};
use groundgate_orchestrator::Orchestrator;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

pub use error::ApiError;
pub use wire::CompleteRequest;

/// Request bodies above this are rejected before parsing.
const BODY_LIMIT: usize = 1024 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    /// Ceiling on any caller deadline.
    pub request_timeout: Duration,
    pub start_time: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>, request_timeout: Duration) -> Self {
        Self {
            orchestrator,
            request_timeout,
            start_time: Utc::now(),
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the router with all gateway routes.
///
/// Layers applied:
/// - CORS restricted to the local origin
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, port: u16) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));
    if let Ok(origin) = HeaderValue::from_str(&format!("http://localhost:{port}")) {
        cors = cors.allow_origin(origin);
    }

    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/complete", post(complete_handler))
        .route("/v1/admission", get(admission_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);
    let state = Arc::new(GatewayState::new(
        orchestrator,
        Duration::from_secs(config.server.request_timeout_secs),
    ));
    let app = build_router(state, config.server.port);

    info!(
        addr = %addr,
        backends = config.backends.len(),
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
    backends: Vec<String>,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        backends: state.orchestrator.backends().names(),
    })
}

async fn admission_handler(State(state): State<SharedState>) -> Json<AdmissionHealth> {
    Json(state.orchestrator.admission_health())
}

async fn complete_handler(
    State(state): State<SharedState>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<CanonicalResponse>, ApiError> {
    let default = Duration::from_secs(state.orchestrator.settings().call_timeout_secs);
    let deadline = body.deadline(default, state.request_timeout);
    debug!(
        backend = %body.backend,
        model = %body.model,
        evidence_mode = %body.evidence_mode,
        deadline_ms = deadline.as_millis() as u64,
        "Completion requested"
    );

    let (backend, model, mode) = (body.backend.clone(), body.model.clone(), body.evidence_mode);
    let mut request = match body.into_canonical() {
        Ok(request) => request,
        Err(e) => {
            let error = Error::from(e);
            state.orchestrator.record_rejected(&backend, &model, mode, &error);
            return Err(ApiError(error));
        }
    };
    let response = state
        .orchestrator
        .complete_with_deadline(&mut request, deadline)
        .await?;
    Ok(Json(response))
}
