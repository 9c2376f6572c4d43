//! Reconnection backoff schedule

use std::time::Duration;

/// Exponential backoff parameters for reconnection attempts
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial: Duration,
    /// Growth factor between consecutive retries
    pub multiplier: f64,
    /// Ceiling on any single delay
    pub max: Duration,
    /// Give up after this many consecutive failures; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            multiplier: 2.0,
            max: Duration::from_millis(30_000),
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (1-based):
    /// `min(initial * multiplier^(attempt-1), max)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = self.multiplier.powi(exponent as i32);
        // mul_f64 panics on Duration overflow; any factor at or past the cap
        // is the cap
        let ceiling = self.max.as_secs_f64() / self.initial.as_secs_f64().max(f64::EPSILON);
        if !factor.is_finite() || factor >= ceiling {
            return self.max;
        }
        self.initial.mul_f64(factor).min(self.max)
    }
}
