//! Retry policy and response classification
//!
//! Decides which statuses are worth another attempt and how long to wait
//! before it. A `Retry-After` header always wins over the computed backoff.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngExt;

/// Statuses retried by default: request timeout, rate limit, and gateway/server faults.
pub const DEFAULT_RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Upper bound for the computed exponential backoff.
const MAX_BACKOFF: Duration = Duration::from_millis(30_000);

/// Used when `Retry-After` is present but neither seconds nor an HTTP-date.
const UNPARSEABLE_RETRY_AFTER: Duration = Duration::from_millis(1_000);

/// Symmetric jitter fraction applied to the exponential backoff.
const JITTER: f64 = 0.25;

/// Classification of an HTTP status for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Worth another attempt after a delay (408, 429, 5xx by default)
    Transient,
    /// Final: success, client errors, or anything outside the retryable set
    Permanent,
}

/// Retry/backoff settings for one transport or one request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`
    pub max_retries: u32,
    /// Base for the exponential backoff
    pub base_delay: Duration,
    /// Budget for each individual attempt (not cumulative)
    pub timeout: Duration,
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_millis(30_000),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.iter().copied().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Classify a response status against this policy's retryable set.
    pub fn classify(&self, status: u16) -> ErrorClassification {
        if self.retryable_statuses.contains(&status) {
            ErrorClassification::Transient
        } else {
            ErrorClassification::Permanent
        }
    }

    /// Exponential backoff for the given zero-based attempt with a random jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(-JITTER..=JITTER);
        self.backoff_delay_with_jitter(attempt, jitter)
    }

    /// `min(base_delay * 2^attempt * (1 + jitter), 30s)`.
    ///
    /// `jitter` is clamped to the ±25% band.
    pub fn backoff_delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(-JITTER, JITTER);
        let factor = 2f64.powi(attempt.min(30) as i32) * (1.0 + jitter);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(MAX_BACKOFF.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Delay requested by a `Retry-After` header value.
///
/// Integer values are seconds; anything else is parsed as an HTTP-date and
/// turned into the remaining time until that instant (zero if in the past).
/// Values that parse as neither fall back to one second.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Duration {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(target) => {
            let remaining = target.with_timezone(&Utc) - now;
            remaining.to_std().unwrap_or(Duration::ZERO)
        }
        Err(_) => UNPARSEABLE_RETRY_AFTER,
    }
}
