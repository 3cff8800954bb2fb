//! The admission controller: one lane per backend plus a shared circuit
//! breaker and retry policy.

use crate::AdmissionError;
use crate::circuit::{CircuitBreaker, CircuitSnapshot, RouteDecision};
use crate::ledger::{Decision, Grant, Ledger, LedgerSettings, LedgerSnapshot};
use crate::retry::RetryPolicy;
use groundgate_config::{AdmissionConfig, GatewayConfig};
use groundgate_core::{BackendError, CanonicalRequest, Routing, TokenClass, TrimNotice, tokens};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a caller asks the controller for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationProfile {
    pub backend: String,
    pub class: TokenClass,
    pub estimated_input_tokens: u32,
    pub requested_output_tokens: u32,
}

impl ReservationProfile {
    pub fn new(
        backend: impl Into<String>,
        class: TokenClass,
        estimated_input_tokens: u32,
        requested_output_tokens: u32,
    ) -> Self {
        Self {
            backend: backend.into(),
            class,
            estimated_input_tokens,
            requested_output_tokens,
        }
    }

    /// Profile for a request as it will be sent (after context injection).
    pub fn for_request(request: &CanonicalRequest) -> Self {
        Self::new(
            request.backend(),
            request.token_class(),
            tokens::estimate_messages_tokens(request.messages()),
            request.max_output_tokens(),
        )
    }
}

struct BackendLane {
    ledger: Mutex<Ledger>,
    heavy: Arc<tokio::sync::Mutex<()>>,
    slots: Arc<Semaphore>,
    slots_total: usize,
}

enum LanePermit {
    Heavy(#[allow(dead_code)] OwnedMutexGuard<()>),
    Slot(#[allow(dead_code)] OwnedSemaphorePermit),
}

/// Tokens held against a backend's window until [`Reservation::release`].
///
/// Also holds the lane permit (heavy lock or slot); dropping the
/// reservation without releasing frees the lane but leaves the tokens
/// charged.
pub struct Reservation {
    backend: String,
    lane: Arc<BackendLane>,
    grant: Grant,
    class: TokenClass,
    base_units: u64,
    trim_notice: Option<TrimNotice>,
    multipliers: BTreeMap<String, f64>,
    _permit: LanePermit,
}

impl Reservation {
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn granted_output_tokens(&self) -> u32 {
        self.grant.output_tokens
    }

    pub fn reserved_tokens(&self) -> u64 {
        self.grant.reserved
    }

    pub fn trim_notice(&self) -> Option<&TrimNotice> {
        self.trim_notice.as_ref()
    }

    pub fn class(&self) -> TokenClass {
        self.class
    }

    /// Multiplier applied to this reservation.
    pub fn multiplier(&self) -> f64 {
        self.grant.multiplier
    }

    /// Every class multiplier at reservation time.
    pub fn multipliers(&self) -> &BTreeMap<String, f64> {
        &self.multipliers
    }

    /// Settle against the tokens the call actually consumed and free the lane.
    pub fn release(self, actual_total_tokens: u64) {
        let mut ledger = self.lane.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger.release(
            Instant::now(),
            &self.grant,
            self.class,
            self.base_units,
            actual_total_tokens,
        );
        debug!(
            backend = %self.backend,
            class = %self.class,
            reserved = self.grant.reserved,
            actual = actual_total_tokens,
            "Reservation released"
        );
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("backend", &self.backend)
            .field("class", &self.class.to_string())
            .field("granted_output_tokens", &self.grant.output_tokens)
            .field("reserved_tokens", &self.grant.reserved)
            .field("trimmed", &self.grant.trimmed)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub backend: String,
    #[serde(flatten)]
    pub ledger: LedgerSnapshot,
    pub slots_total: usize,
    pub slots_available: usize,
    pub heavy_busy: bool,
}

/// Snapshot served by `GET /v1/admission`.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionHealth {
    pub backends: Vec<BackendHealth>,
    pub circuits: Vec<CircuitSnapshot>,
}

pub struct AdmissionController {
    lanes: HashMap<String, Arc<BackendLane>>,
    circuit: CircuitBreaker,
    retry: RetryPolicy,
    heavy_freshness: f64,
}

impl AdmissionController {
    /// Build a controller with one lane per `(backend, tokens_per_window)`.
    pub fn new(config: &AdmissionConfig, backends: impl IntoIterator<Item = (String, u64)>) -> Self {
        let now = Instant::now();
        let slots = config.concurrency_slots.max(1);
        let lanes = backends
            .into_iter()
            .map(|(name, capacity)| {
                let settings = LedgerSettings::from_config(config, capacity);
                let lane = BackendLane {
                    ledger: Mutex::new(Ledger::new(settings, |c| config.initial_multiplier(c), now)),
                    heavy: Arc::new(tokio::sync::Mutex::new(())),
                    slots: Arc::new(Semaphore::new(slots)),
                    slots_total: slots,
                };
                (name, Arc::new(lane))
            })
            .collect();
        Self {
            lanes,
            circuit: CircuitBreaker::from_config(&config.circuit),
            retry: RetryPolicy::from_config(&config.retry),
            heavy_freshness: config.heavy_freshness,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let backends = config
            .backends
            .keys()
            .map(|name| (name.clone(), config.tokens_per_window(name)));
        Self::new(&config.admission, backends)
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn route(&self, requested: &Routing) -> RouteDecision {
        self.circuit.route(requested)
    }

    fn configured(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lanes.keys().cloned().collect();
        names.sort();
        names
    }

    fn lane(&self, backend: &str) -> Result<Arc<BackendLane>, AdmissionError> {
        self.lanes
            .get(backend)
            .cloned()
            .ok_or_else(|| AdmissionError::UnknownBackend {
                backend: backend.to_string(),
                configured: self.configured(),
            })
    }

    /// Current class multipliers for a backend.
    pub fn multipliers(&self, backend: &str) -> Option<BTreeMap<String, f64>> {
        let lane = self.lanes.get(backend)?;
        let ledger = lane.ledger.lock().unwrap_or_else(|e| e.into_inner());
        Some(ledger.multipliers())
    }

    /// Admit a call, waiting for its lane and for budget as needed.
    ///
    /// Heavy classes take the backend's exclusive lock and wait until the
    /// window is mostly unspent; everything else takes a slot. Output is
    /// trimmed (never below the configured floor) rather than waiting
    /// when a smaller grant fits now.
    pub async fn reserve(&self, profile: ReservationProfile) -> Result<Reservation, AdmissionError> {
        let lane = self.lane(&profile.backend)?;
        let class = profile.class;
        let heavy = class.is_heavy();

        let permit = if heavy {
            debug!(backend = %profile.backend, class = %class, "Waiting for heavy lane");
            LanePermit::Heavy(lane.heavy.clone().lock_owned().await)
        } else {
            let slot = lane
                .slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| AdmissionError::Closed)?;
            LanePermit::Slot(slot)
        };

        loop {
            let now = Instant::now();
            let (decision, multipliers, capacity) = {
                let mut ledger = lane.ledger.lock().unwrap_or_else(|e| e.into_inner());
                let decision = if heavy && ledger.freshness(now) < self.heavy_freshness {
                    Decision::Wait {
                        until: ledger.resets_at(),
                    }
                } else {
                    ledger.try_reserve(
                        now,
                        class,
                        profile.estimated_input_tokens,
                        profile.requested_output_tokens,
                    )
                };
                (decision, ledger.multipliers(), ledger.capacity())
            };

            match decision {
                Decision::Grant(grant) => {
                    let trim_notice = grant.trimmed.then(|| TrimNotice {
                        requested_output_tokens: profile.requested_output_tokens,
                        granted_output_tokens: grant.output_tokens,
                        remaining_budget: grant.remaining,
                    });
                    if trim_notice.is_some() {
                        info!(
                            backend = %profile.backend,
                            class = %class,
                            requested = profile.requested_output_tokens,
                            granted = grant.output_tokens,
                            remaining = grant.remaining,
                            "Output tokens trimmed to fit the window"
                        );
                    }
                    debug!(
                        backend = %profile.backend,
                        class = %class,
                        reserved = grant.reserved,
                        multiplier = grant.multiplier,
                        "Reservation granted"
                    );
                    return Ok(Reservation {
                        backend: profile.backend,
                        base_units: profile.estimated_input_tokens as u64 + grant.output_tokens as u64,
                        lane,
                        grant,
                        class,
                        trim_notice,
                        multipliers,
                        _permit: permit,
                    });
                }
                Decision::Wait { until } => {
                    debug!(
                        backend = %profile.backend,
                        class = %class,
                        wait_ms = until.saturating_duration_since(now).as_millis() as u64,
                        "Window exhausted, waiting for the next one"
                    );
                    tokio::time::sleep_until(until).await;
                }
                Decision::Never { needed } => {
                    warn!(
                        backend = %profile.backend,
                        needed,
                        capacity,
                        "Request can never fit the window"
                    );
                    return Err(AdmissionError::ExceedsCapacity {
                        backend: profile.backend,
                        needed,
                        capacity,
                    });
                }
            }
        }
    }

    /// Run `op` with retries.
    ///
    /// Rate-limit errors back off (honoring a server delay) until the
    /// attempt cap. Transport errors count against `routing`'s circuit and
    /// stop retrying once it opens. Anything else surfaces immediately.
    pub async fn execute<T, F, Fut>(&self, routing: &Routing, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => {
                    self.circuit.record_success(routing);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let delay = if err.is_rate_limit() {
                self.retry.delay(attempt, err.retry_after())
            } else if err.is_transport() {
                self.circuit.record_failure(routing);
                if self.circuit.is_open(routing) {
                    return Err(err);
                }
                self.retry.delay(attempt, None)
            } else {
                return Err(err);
            };

            if attempt >= max_attempts {
                warn!(attempt, error = %err, "Retries exhausted");
                return Err(err);
            }
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Backend call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub fn health(&self) -> AdmissionHealth {
        let now = Instant::now();
        let mut backends: Vec<BackendHealth> = self
            .lanes
            .iter()
            .map(|(name, lane)| {
                let ledger = lane
                    .ledger
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .snapshot(now);
                BackendHealth {
                    backend: name.clone(),
                    ledger,
                    slots_total: lane.slots_total,
                    slots_available: lane.slots.available_permits(),
                    heavy_busy: lane.heavy.try_lock().is_err(),
                }
            })
            .collect();
        backends.sort_by(|a, b| a.backend.cmp(&b.backend));
        AdmissionHealth {
            backends,
            circuits: self.circuit.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundgate_core::{ContextPolicy, EvidenceMode, TransportFailure, TransportMode};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn controller(slots: usize, capacity: u64) -> AdmissionController {
        let mut config = AdmissionConfig {
            concurrency_slots: slots,
            ..Default::default()
        };
        config.retry.jitter = 0.0;
        config.circuit.threshold = 2;
        AdmissionController::new(&config, [("openai".to_string(), capacity)])
    }

    fn plain() -> TokenClass {
        TokenClass::new(EvidenceMode::None, ContextPolicy::None)
    }

    fn heavy() -> TokenClass {
        TokenClass::new(EvidenceMode::Auto, ContextPolicy::Preamble)
    }

    fn profile(class: TokenClass, input: u32, output: u32) -> ReservationProfile {
        ReservationProfile::new("openai", class, input, output)
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_backend_is_rejected() {
        let c = controller(2, 10_000);
        let err = c
            .reserve(ReservationProfile::new("nope", plain(), 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::UnknownBackend { ref configured, .. } if configured == &["openai"]));
    }

    #[tokio::test(start_paused = true)]
    async fn trim_produces_a_notice() {
        let c = controller(4, 10_000);
        let first = c.reserve(profile(plain(), 6000, 1000)).await.unwrap(); // 8400
        let second = c.reserve(profile(plain(), 500, 1000)).await.unwrap();
        let notice = second.trim_notice().expect("trimmed");
        assert_eq!(notice.requested_output_tokens, 1000);
        assert_eq!(notice.granted_output_tokens, second.granted_output_tokens());
        assert!(second.granted_output_tokens() >= 256);
        assert!(first.reserved_tokens() + second.reserved_tokens() <= 10_000);
        assert!(first.trim_notice().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_the_next_window_when_nothing_fits() {
        let c = controller(4, 10_000);
        let start = Instant::now();
        let _big = c.reserve(profile(plain(), 8000, 300)).await.unwrap(); // 9960
        let next = c.reserve(profile(plain(), 100, 1000)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(next.granted_output_tokens(), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_request_fails_fast() {
        let c = controller(4, 1_000);
        let err = c.reserve(profile(heavy(), 5000, 500)).await.unwrap_err();
        match err {
            AdmissionError::ExceedsCapacity { capacity, needed, .. } => {
                assert_eq!(capacity, 1_000);
                assert!(needed > capacity);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn heavy_calls_are_serialized() {
        let c = Arc::new(controller(4, 100_000));
        let first = c.reserve(profile(heavy(), 100, 100)).await.unwrap();

        let blocked = tokio::time::timeout(
            Duration::from_secs(1),
            c.reserve(profile(heavy(), 100, 100)),
        )
        .await;
        assert!(blocked.is_err(), "second heavy call admitted while first held the lane");
        assert!(c.health().backends[0].heavy_busy);

        // Plain calls are unaffected by the heavy lock.
        let plain_res = c.reserve(profile(plain(), 100, 100)).await.unwrap();
        plain_res.release(240);

        first.release(400);
        let second = c.reserve(profile(heavy(), 100, 100)).await.unwrap();
        assert_eq!(second.class(), heavy());
    }

    #[tokio::test(start_paused = true)]
    async fn heavy_calls_wait_for_a_fresh_window() {
        let c = controller(4, 10_000);
        let start = Instant::now();
        let _plain = c.reserve(profile(plain(), 2000, 500)).await.unwrap(); // 3000, 70% fresh
        let heavy_res = c.reserve(profile(heavy(), 100, 100)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(heavy_res.trim_notice().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn plain_calls_share_a_bounded_slot_pool() {
        let c = controller(1, 100_000);
        let held = c.reserve(profile(plain(), 10, 10)).await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_secs(1), c.reserve(profile(plain(), 10, 10))).await;
        assert!(blocked.is_err());
        assert_eq!(c.health().backends[0].slots_available, 0);
        held.release(24);
        c.reserve(profile(plain(), 10, 10)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_are_retried_with_the_server_delay() {
        let c = controller(4, 10_000);
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let out = c
            .execute(&Routing::default(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(BackendError::RateLimited {
                            retry_after: Some(Duration::from_secs(5)),
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_surfaces_after_the_attempt_cap() {
        let c = controller(4, 10_000);
        let calls = AtomicU32::new(0);
        let err = c
            .execute(&Routing::default(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BackendError::RateLimited { retry_after: None }) }
            })
            .await
            .unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_trip_the_circuit_and_stop_retrying() {
        let c = controller(4, 10_000);
        let routed = Routing::new("eu", TransportMode::Routed);
        let calls = AtomicU32::new(0);
        let err = c
            .execute(&routed, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BackendError::transport(TransportFailure::Timeout, "slow")) }
            })
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(c.route(&routed), RouteDecision::Degrade { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn api_errors_are_not_retried() {
        let c = controller(4, 10_000);
        let calls = AtomicU32::new(0);
        let err = c
            .execute(&Routing::default(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(BackendError::Api {
                        status_code: 400,
                        message: "bad".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Api { status_code: 400, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn health_serializes_lanes_and_circuits() {
        let c = controller(2, 10_000);
        let r = c.reserve(profile(plain(), 100, 100)).await.unwrap();
        c.circuit().record_failure(&Routing::default());
        let health = serde_json::to_value(c.health()).unwrap();
        assert_eq!(health["backends"][0]["backend"], "openai");
        assert_eq!(health["backends"][0]["capacity"], 10_000);
        assert_eq!(health["backends"][0]["remaining"], 10_000 - r.reserved_tokens());
        assert_eq!(health["backends"][0]["slots_available"], 1);
        assert_eq!(health["backends"][0]["multipliers"]["auto/none"], 2.25);
        assert_eq!(health["circuits"][0]["consecutive_errors"], 1);
        r.release(0);
    }

    #[tokio::test(start_paused = true)]
    async fn reservation_snapshots_multipliers() {
        let c = controller(2, 10_000);
        let r = c.reserve(profile(heavy(), 10, 10)).await.unwrap();
        assert_eq!(r.multiplier(), 2.25);
        assert_eq!(r.multipliers()["none/none"], 1.2);
        assert_eq!(r.multipliers().len(), 6);
    }
}
