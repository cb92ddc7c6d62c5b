//! Retry classification and backoff for fetch attempts.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying attempt errors and determining retry behavior.
//!
//! # Overview
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::NotFound`] - The object does not exist upstream; never retried
//! - [`FailureType::RateLimited`] - The origin asked us to slow down; retried after
//!   the server's Retry-After hint (or a fixed default wait)
//! - [`FailureType::Transient`] - Any other failure; retried with linear backoff
//! - [`FailureType::Permanent`] - The request itself is malformed; never retried
//!
//! # Example
//!
//! ```
//! use blobfetch_core::fetch::{FetchError, FailureType, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = FetchError::http_status("https://blobs.example/abc", 503);
//!
//! match policy.should_retry(classify_error(&error), 1, None) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {delay:?} (attempt {attempt})");
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {reason}");
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::FetchError;

/// Default maximum attempts per item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff unit; the nth retry waits `n` units.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Wait applied to a rate-limited response without a usable Retry-After.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_millis(2000);

/// Classification of attempt failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// The object does not exist (404, 410).
    NotFound,

    /// Server rate limiting (HTTP 429).
    RateLimited,

    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network errors, timeouts, 5xx and unexpected 4xx responses.
    Transient,

    /// The request cannot succeed as built (malformed URL).
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `backoff_base`: 1 second
/// - `rate_limit_wait`: 2 seconds
/// - `max_jitter`: none
///
/// # Delay Calculation
///
/// ```text
/// transient:    delay = backoff_base * attempt + jitter
/// rate limited: delay = retry_after.unwrap_or(rate_limit_wait)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Backoff unit for transient failures.
    backoff_base: Duration,

    /// Wait for rate-limited responses without a server hint.
    rate_limit_wait: Duration,

    /// Upper bound of random jitter added to transient backoff.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            rate_limit_wait: DEFAULT_RATE_LIMIT_WAIT,
            max_jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base: Duration, rate_limit_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
            rate_limit_wait,
            max_jitter: Duration::ZERO,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Adds up to `max_jitter` of random delay to transient backoff.
    #[must_use]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff unit for transient failures.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Returns the fallback wait for rate-limited responses.
    #[must_use]
    pub fn rate_limit_wait(&self) -> Duration {
        self.rate_limit_wait
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    /// * `retry_after` - Server-suggested wait, used for rate-limited failures
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(
        &self,
        failure_type: FailureType,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        match failure_type {
            FailureType::NotFound => {
                return RetryDecision::DoNotRetry {
                    reason: "not found - object does not exist upstream".to_string(),
                };
            }
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = if failure_type == FailureType::RateLimited {
            retry_after.unwrap_or(self.rate_limit_wait)
        } else {
            self.backoff_delay(attempt)
        };

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Linear backoff: `backoff_base * attempt`, plus jitter when configured.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt) + self.jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=self.max_jitter.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies an attempt error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | `NotFound` / HTTP 404, 410 | NotFound |
/// | HTTP 429 | RateLimited |
/// | other HTTP status, network, timeout | Transient |
/// | `InvalidUrl` | Permanent |
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::NotFound { .. } => FailureType::NotFound,
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::Network { .. } | FetchError::Timeout { .. } => FailureType::Transient,
        FetchError::InvalidUrl { .. } => FailureType::Permanent,
    }
}

/// Classifies a non-success HTTP status code.
#[must_use]
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        404 | 410 => FailureType::NotFound,
        429 => FailureType::RateLimited,
        _ => FailureType::Transient,
    }
}
