//! Reconnect backoff policy for the stream client (spec §4.1 / §9 Design
//! Notes: "model the stream as a restartable task with a backoff policy
//! value" rather than an ad-hoc retry loop).

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { initial: Duration::from_secs(1), max: Duration::from_secs(30), multiplier: 2.0 }
    }
}

impl BackoffPolicy {
    /// Delay for the given 0-indexed attempt, full-jittered between zero and
    /// the deterministic exponential ceiling.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling_secs = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let ceiling = Duration::from_secs_f64(ceiling_secs.min(self.max.as_secs_f64()));
        let jitter_fraction: f64 = rand::rng().random_range(0.5..=1.0);
        ceiling.mul_f64(jitter_fraction)
    }
}
