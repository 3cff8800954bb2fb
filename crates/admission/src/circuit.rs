//! Circuit breaker keyed by (region, transport mode).
//!
//! Consecutive transport errors on one key open its circuit; it closes
//! itself once the cooldown has passed with no further failures. A routed
//! call whose circuit is open degrades to the standard transport for the
//! same region; a standard call with an open circuit is rejected.

use groundgate_config::CircuitConfig;
use groundgate_core::{Routing, TransportMode};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
struct CircuitState {
    consecutive_errors: u32,
    opened_at: Option<Instant>,
}

/// Where a call should go given current circuit states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Proceed(Routing),
    Degrade { from: Routing, to: Routing },
    Reject(Routing),
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub region: String,
    pub transport_mode: TransportMode,
    pub consecutive_errors: u32,
    pub open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closes_in_ms: Option<u64>,
}

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<Routing, CircuitState>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &CircuitConfig) -> Self {
        Self::new(config.threshold, config.cooldown())
    }

    /// Whether the circuit for `routing` is open. Closes it first if the
    /// cooldown has elapsed.
    pub fn is_open(&self, routing: &Routing) -> bool {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let Some(state) = states.get_mut(routing) else {
            return false;
        };
        match state.opened_at {
            Some(opened) if now.saturating_duration_since(opened) >= self.cooldown => {
                *state = CircuitState::default();
                info!(
                    region = %routing.region,
                    transport_mode = %routing.transport_mode,
                    "Circuit closed after cooldown"
                );
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn record_failure(&self, routing: &Routing) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = states.entry(routing.clone()).or_default();
        state.consecutive_errors += 1;
        if state.opened_at.is_none() && state.consecutive_errors >= self.threshold {
            state.opened_at = Some(Instant::now());
            warn!(
                region = %routing.region,
                transport_mode = %routing.transport_mode,
                errors = state.consecutive_errors,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            );
        }
    }

    pub fn record_success(&self, routing: &Routing) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get_mut(routing) {
            if state.opened_at.is_none() {
                state.consecutive_errors = 0;
            }
        }
    }

    /// Decide where a call with the requested routing should travel.
    pub fn route(&self, requested: &Routing) -> RouteDecision {
        if !self.is_open(requested) {
            return RouteDecision::Proceed(requested.clone());
        }
        if requested.transport_mode == TransportMode::Routed {
            let fallback = Routing::new(requested.region.clone(), TransportMode::Standard);
            if !self.is_open(&fallback) {
                warn!(
                    region = %requested.region,
                    "Routed circuit open, degrading to standard transport"
                );
                return RouteDecision::Degrade {
                    from: requested.clone(),
                    to: fallback,
                };
            }
            return RouteDecision::Reject(fallback);
        }
        RouteDecision::Reject(requested.clone())
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let now = Instant::now();
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<CircuitSnapshot> = states
            .iter()
            .map(|(routing, state)| {
                let closes_in = state
                    .opened_at
                    .map(|opened| self.cooldown.saturating_sub(now.saturating_duration_since(opened)));
                CircuitSnapshot {
                    region: routing.region.clone(),
                    transport_mode: routing.transport_mode,
                    consecutive_errors: state.consecutive_errors,
                    open: closes_in.is_some_and(|d| !d.is_zero()),
                    closes_in_ms: closes_in.map(|d| d.as_millis() as u64),
                }
            })
            .collect();
        out.sort_by(|a, b| {
            (a.region.as_str(), a.transport_mode.as_str())
                .cmp(&(b.region.as_str(), b.transport_mode.as_str()))
        });
        out
    }
}
