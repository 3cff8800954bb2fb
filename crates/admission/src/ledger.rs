//! Per-backend token ledger.
//!
//! One window of `capacity` tokens that resets on a rolling boundary, a
//! multiplier per [`TokenClass`] that inflates raw estimates to what the
//! backend actually bills, and the rolling samples those multipliers are
//! tuned from. Never persisted: a restart begins from the configured
//! starting multipliers.

use groundgate_config::AdmissionConfig;
use groundgate_core::TokenClass;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// The slice of [`AdmissionConfig`] one ledger needs.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub capacity: u64,
    pub window: Duration,
    pub min_output_tokens: u32,
    pub min_multiplier: f64,
    pub max_multiplier: f64,
    pub sample_size: usize,
    pub percentile: f64,
    pub tuning_min_samples: usize,
}

impl LedgerSettings {
    pub fn from_config(config: &AdmissionConfig, capacity: u64) -> Self {
        Self {
            capacity,
            window: config.window(),
            min_output_tokens: config.min_output_tokens,
            min_multiplier: config.min_multiplier,
            max_multiplier: config.max_multiplier,
            sample_size: config.sample_size,
            percentile: config.percentile,
            tuning_min_samples: config.tuning_min_samples,
        }
    }
}

/// Outcome of one reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Grant(Grant),
    /// Nothing fits right now; try again at `until` (the next window).
    Wait { until: Instant },
    /// Even a fresh window could not hold the minimum output.
    Never { needed: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub output_tokens: u32,
    pub reserved: u64,
    pub multiplier: f64,
    /// Remaining budget after this grant.
    pub remaining: u64,
    pub trimmed: bool,
    /// Identifies the window the tokens were taken from.
    pub epoch: u64,
}

/// `ceil((input + output) * multiplier)`.
pub fn estimate(input: u32, output: u32, multiplier: f64) -> u64 {
    ((input as u64 + output as u64) as f64 * multiplier).ceil() as u64
}

/// Nearest-rank percentile; `None` for an empty sample.
pub fn percentile(samples: impl IntoIterator<Item = f64>, p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = samples.into_iter().filter(|s| s.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = (p * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}

#[derive(Debug)]
pub struct Ledger {
    settings: LedgerSettings,
    window_start: Instant,
    epoch: u64,
    remaining: u64,
    multipliers: HashMap<TokenClass, f64>,
    samples: HashMap<TokenClass, VecDeque<f64>>,
}

impl Ledger {
    pub fn new(settings: LedgerSettings, initial: impl Fn(TokenClass) -> f64, now: Instant) -> Self {
        let multipliers = TokenClass::all()
            .into_iter()
            .map(|class| {
                let m = initial(class).clamp(settings.min_multiplier, settings.max_multiplier);
                (class, m)
            })
            .collect();
        Self {
            remaining: settings.capacity,
            settings,
            window_start: now,
            epoch: 0,
            multipliers,
            samples: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.settings.capacity
    }

    /// Start a new window if the current one has run out.
    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.settings.window {
            return;
        }
        let window = self.settings.window.as_nanos().max(1);
        let into_current = Duration::from_nanos((elapsed.as_nanos() % window) as u64);
        self.window_start = now.checked_sub(into_current).unwrap_or(now);
        self.epoch += 1;
        self.remaining = self.settings.capacity;
    }

    pub fn remaining(&mut self, now: Instant) -> u64 {
        self.roll(now);
        self.remaining
    }

    pub fn resets_at(&self) -> Instant {
        self.window_start + self.settings.window
    }

    /// Fraction of the current window still unspent.
    pub fn freshness(&mut self, now: Instant) -> f64 {
        self.roll(now);
        if self.settings.capacity == 0 {
            return 0.0;
        }
        self.remaining as f64 / self.settings.capacity as f64
    }

    pub fn multiplier(&self, class: TokenClass) -> f64 {
        self.multipliers
            .get(&class)
            .copied()
            .unwrap_or(self.settings.max_multiplier)
    }

    /// Every class multiplier, keyed `"<evidence_mode>/<context_policy>"`.
    pub fn multipliers(&self) -> BTreeMap<String, f64> {
        TokenClass::all()
            .into_iter()
            .map(|class| (class.to_string(), self.multiplier(class)))
            .collect()
    }

    /// Largest output that still fits in `budget` alongside `input`.
    fn largest_output(input: u32, multiplier: f64, budget: u64) -> Option<u32> {
        let units = (budget as f64 / multiplier).floor() as u64;
        let mut output = units.checked_sub(input as u64)?.min(u32::MAX as u64) as u32;
        // Float rounding can overshoot by a token or two.
        while output > 0 && estimate(input, output, multiplier) > budget {
            output -= 1;
        }
        (estimate(input, output, multiplier) <= budget).then_some(output)
    }

    /// Reserve for `input` plus up to `requested` output tokens.
    ///
    /// Grants the full request when it fits, otherwise the largest output
    /// that fits as long as it is at least the configured floor.
    pub fn try_reserve(&mut self, now: Instant, class: TokenClass, input: u32, requested: u32) -> Decision {
        self.roll(now);
        let multiplier = self.multiplier(class);
        let floor = self.settings.min_output_tokens.min(requested);

        let full = estimate(input, requested, multiplier);
        let output = if full <= self.remaining {
            Some(requested)
        } else {
            Self::largest_output(input, multiplier, self.remaining)
                .map(|o| o.min(requested))
                .filter(|o| *o >= floor)
        };

        match output {
            Some(output_tokens) => {
                let reserved = estimate(input, output_tokens, multiplier);
                self.remaining -= reserved;
                Decision::Grant(Grant {
                    output_tokens,
                    reserved,
                    multiplier,
                    remaining: self.remaining,
                    trimmed: output_tokens < requested,
                    epoch: self.epoch,
                })
            }
            None => {
                let needed = estimate(input, floor, multiplier);
                if needed > self.settings.capacity {
                    Decision::Never { needed }
                } else {
                    Decision::Wait {
                        until: self.resets_at(),
                    }
                }
            }
        }
    }

    /// Settle a reservation against what the call actually used.
    ///
    /// `actual` of zero means the backend reported no usage: the
    /// reservation stands as charged and no sample is taken.
    pub fn release(&mut self, now: Instant, grant: &Grant, class: TokenClass, base_units: u64, actual: u64) {
        self.roll(now);
        if actual == 0 {
            return;
        }
        if grant.epoch == self.epoch {
            if actual < grant.reserved {
                self.remaining = (self.remaining + (grant.reserved - actual)).min(self.settings.capacity);
            } else {
                self.remaining = self.remaining.saturating_sub(actual - grant.reserved);
            }
        }
        if base_units > 0 {
            self.record_sample(class, actual as f64 / base_units as f64);
        }
    }

    fn record_sample(&mut self, class: TokenClass, ratio: f64) {
        let size = self.settings.sample_size.max(1);
        let samples = self.samples.entry(class).or_default();
        samples.push_back(ratio);
        while samples.len() > size {
            samples.pop_front();
        }
        if samples.len() < self.settings.tuning_min_samples {
            return;
        }
        if let Some(p) = percentile(samples.iter().copied(), self.settings.percentile) {
            let tuned = p.clamp(self.settings.min_multiplier, self.settings.max_multiplier);
            let previous = self.multipliers.insert(class, tuned);
            debug!(
                class = %class,
                previous = previous.unwrap_or_default(),
                tuned,
                samples = samples.len(),
                "Class multiplier re-estimated"
            );
        }
    }

    pub fn sample_count(&self, class: TokenClass) -> usize {
        self.samples.get(&class).map_or(0, VecDeque::len)
    }

    pub fn snapshot(&mut self, now: Instant) -> LedgerSnapshot {
        self.roll(now);
        LedgerSnapshot {
            capacity: self.settings.capacity,
            remaining: self.remaining,
            resets_in_ms: self.resets_at().saturating_duration_since(now).as_millis() as u64,
            multipliers: self.multipliers(),
            samples: TokenClass::all()
                .into_iter()
                .map(|class| (class.to_string(), self.sample_count(class)))
                .collect(),
        }
    }
}

/// Point-in-time view of one ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub capacity: u64,
    pub remaining: u64,
    pub resets_in_ms: u64,
    pub multipliers: BTreeMap<String, f64>,
    pub samples: BTreeMap<String, usize>,
}
