use std::time::Duration;

use rand::Rng;

use eclair_shared::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_JITTER, DEFAULT_RETRY_MAX_MS,
};

/// Exponential backoff for delivery retries.
///
/// The jitter draw is fixed per message, so the delays one message sees
/// never shrink from one attempt to the next.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter: 0.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Largest fraction shaved off a delay; clamped to `[0, 1]`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1 for the first retry).
    ///
    /// `min(max, base * 2^(attempt-1)) * (1 - jitter * draw)`.
    pub fn delay_for_attempt(&self, attempt: u32, jitter_draw: f64) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let multiplier = 1_u64 << shift;
        let bounded = self
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms);

        let draw = if jitter_draw.is_finite() { jitter_draw.clamp(0.0, 1.0) } else { 0.0 };
        let factor = 1.0 - self.jitter * draw;
        Duration::from_millis((bounded as f64 * factor).round() as u64)
    }

    /// Whether `attempt` failed attempts use up the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Per-message jitter draw in `[0, 1)`.
    pub fn draw_jitter() -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS)
            .with_jitter(DEFAULT_RETRY_JITTER)
    }
}
