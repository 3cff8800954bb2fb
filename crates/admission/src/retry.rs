//! Backoff schedule for retried backend calls.

use groundgate_config::RetryConfig;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            max: max.max(base),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Exponential delay before retry number `attempt` (1-based), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay to sleep after failed attempt `attempt`.
    ///
    /// A server-supplied delay is a lower bound and jitter only lengthens
    /// it; otherwise the exponential backoff is jittered both ways and
    /// kept under the cap.
    pub fn delay(&self, attempt: u32, server_delay: Option<Duration>) -> Duration {
        let mut rng = rand::rng();
        match server_delay {
            Some(server) => server + server.mul_f64(rng.random_range(0.0..=self.jitter)),
            None => {
                let factor = 1.0 + rng.random_range(-self.jitter..=self.jitter);
                self.backoff(attempt).mul_f64(factor).min(self.max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
