use rand::Rng;
use std::time::Duration;

/// Fixed-interval polling with exponential backoff after failures and optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    pub interval: Duration,
    /// Fraction of the delay to randomize by, in either direction. 0.0 disables jitter.
    pub jitter: f64,
    pub max_backoff: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter: 0.0,
            max_backoff: interval,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = if jitter.is_finite() { jitter.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.interval);
        self
    }

    /// Delay before the next tick, before jitter.
    pub fn base_delay(&self, consecutive_failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive_failures.min(16));
        self.interval.saturating_mul(factor).min(self.max_backoff)
    }

    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        let base = self.base_delay(consecutive_failures);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::try_from_secs_f64(base.as_secs_f64() * (1.0 + spread).max(0.0)).unwrap_or(base)
    }
}
