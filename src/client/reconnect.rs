//! Exponential backoff with jitter for reconnection
//!
//! `next_delay() = min(base * 2^attempt, max)`, then perturbed uniformly
//! within ±`jitter` of that value so a fleet of clients losing the same
//! server does not retry in lockstep.

use rand::Rng;
use std::time::Duration;

/// Backoff policy state. Owned by one client; `attempt` resets to zero on
/// any successful connection and is never shared across reconnection cycles.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy. `jitter` is a fraction of the unjittered delay
    /// (0.1 = ±10%).
    pub fn new(base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        ReconnectPolicy {
            base_delay,
            max_delay,
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Delay before the next retry
    pub fn next_delay(&self) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(self.attempt.min(63) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let spread = capped * self.jitter * (rand::thread_rng().gen::<f64>() * 2.0 - 1.0);
        Duration::from_secs_f64((capped + spread).max(0.0))
    }

    /// Record one failed retry
    pub fn record_failure(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failed attempts so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 0.1)
    }
}
