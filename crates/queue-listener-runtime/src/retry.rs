//! # Retry Policy Module
//!
//! Exponential backoff for transport failures in the poll loop.
//!
//! A poll loop never gives up on its queue; the policy only decides how long
//! to wait before the next `receive` after consecutive failures.

use crate::error::QueueError;
use rand::Rng;
use std::time::Duration;

/// Backoff applied between failed `receive` calls
///
/// ```rust
/// use queue_listener_runtime::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(5), 1.5);
/// assert_eq!(policy.max_delay, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    /// Fraction of the delay added or removed at random, `0.0..=1.0`
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 2.0)
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (zero based)
    ///
    /// ```rust
    /// use queue_listener_runtime::retry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default().without_jitter();
    /// assert_eq!(policy.calculate_delay(0), Duration::from_millis(500));
    /// assert_eq!(policy.calculate_delay(2), Duration::from_secs(2));
    /// ```
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let growth = self
            .backoff_multiplier
            .powi(attempt.min(i32::MAX as u32) as i32);
        let ceiling = self.max_delay.as_secs_f64();
        let delay = (self.initial_delay.as_secs_f64() * growth).min(ceiling);

        if !self.use_jitter || self.jitter_percent <= 0.0 {
            return Duration::from_secs_f64(delay);
        }

        let spread = rand::thread_rng().gen_range(-self.jitter_percent..=self.jitter_percent);
        Duration::from_secs_f64((delay * (1.0 + spread)).max(0.0))
    }
}

/// Consecutive failure tracker for one poll loop
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Failures since the last successful receive
    pub consecutive_failures: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return how long to wait before retrying.
    ///
    /// The error's own suggestion is honoured when it is longer than the backoff.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: &QueueError) -> Duration {
        let backoff = policy.calculate_delay(self.consecutive_failures);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let suggested = error
            .retry_after()
            .and_then(|d| d.to_std().ok())
            .unwrap_or_default()
            .min(policy.max_delay);

        backoff.max(suggested)
    }

    /// Forget past failures after a successful receive
    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn is_failing(&self) -> bool {
        self.consecutive_failures > 0
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
