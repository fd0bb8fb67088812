//! Backoff for retry policies

use rand::Rng;
use std::time::Duration;

/// Exponential backoff delay calculator:
/// delay = initial_delay * base^(attempt-1), capped at `max_delay`
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    initial_delay: Duration,
    max_delay: Duration,
    base: f64,
    jitter: bool,
}

impl BackoffCalculator {
    /// Exponential backoff with jitter
    pub fn exponential(initial_delay: Duration, max_delay: Duration, base: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            base,
            jitter: true,
        }
    }

    /// Same delays without the random spread
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Calculate delay for a specific attempt (1-indexed). Never exceeds
    /// the configured maximum, jitter included.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let capped_delay = self.calculate_base_delay(attempt).min(self.max_delay);

        if self.jitter {
            self.add_jitter(capped_delay).min(self.max_delay)
        } else {
            capped_delay
        }
    }

    fn calculate_base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = self.base.powi(attempt.min(i32::MAX as u32) as i32 - 1);
        let nanos = self.initial_delay.as_nanos() as f64 * multiplier;
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();

        // Add ±20% jitter
        let jitter_factor = rng.gen_range(0.8..1.2);
        Duration::from_nanos((delay.as_nanos() as f64 * jitter_factor) as u64)
    }
}

/// Bounded sequence of retry delays for one unit of work, such as filling
/// a single worker slot.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    calculator: BackoffCalculator,
    max_attempts: u32,
    attempts: u32,
}

impl RetryBudget {
    pub fn new(calculator: BackoffCalculator, max_attempts: u32) -> Self {
        Self {
            calculator,
            max_attempts,
            attempts: 0,
        }
    }

    /// Record a failed attempt. Returns the delay before the next attempt,
    /// or `None` once the budget is spent.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= self.max_attempts {
            None
        } else {
            Some(self.calculator.calculate_delay(self.attempts))
        }
    }

    /// Failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
