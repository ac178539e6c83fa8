// src/utils/backoff.rs
use rand::Rng;
use std::time::Duration;

/// Doubling delay for rate-limited market data requests, capped at `max`
/// and spread by a symmetric jitter so several bots do not retry in step.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    failures: u32,
}

impl ExponentialBackoff {
    /// `jitter` is a fraction of the delay; negative values mean none.
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max,
            jitter: jitter.max(0.0),
            failures: 0,
        }
    }

    /// Delay to wait after one more consecutive failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(self.failures))
            .min(self.max);
        self.failures = self.failures.saturating_add(1);

        let spread = delay.as_secs_f64() * self.jitter;
        if spread <= 0.0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    /// Called after a successful request.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
