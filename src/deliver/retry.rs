//! Retry policy for batch delivery.
//!
//! A small, self-contained policy object (attempt budget, exponential
//! backoff, pluggable jitter) so the retry behavior can be unit tested
//! without a real transport or real sleeps.

use rand::Rng;
use std::time::Duration;

/// Classification of an HTTP response status for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx: the batch was accepted.
    Success,
    /// Worth retrying: request timeout, throttling, or server-side failure.
    Retryable,
    /// Client-side rejection that a retry cannot fix.
    Terminal,
}

/// Classify an HTTP status code.
///
/// 408 and 429 are retryable alongside all 5xx; every other non-2xx
/// status is terminal. Network-level errors never reach this function,
/// they are always retryable.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        408 | 429 => StatusClass::Retryable,
        500..=599 => StatusClass::Retryable,
        _ => StatusClass::Terminal,
    }
}

/// Default jitter: add up to 500ms of uniform random delay.
fn default_jitter(delay: Duration) -> Duration {
    delay + Duration::from_millis(rand::rng().random_range(0..500))
}

/// Exponential backoff policy with jitter.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 = no retries).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff multiplier applied per retry.
    pub multiplier: f64,
    /// Jitter applied to each computed delay, to avoid synchronized
    /// retries across concurrent callers.
    pub jitter: fn(Duration) -> Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: default_jitter,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given retry budget and default backoff shape.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Total attempt budget including the initial attempt.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Jittered delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let backoff = self.base_delay.mul_f64(self.multiplier.powi(retry as i32));
        (self.jitter)(backoff)
    }
}
