//! Rate-limit quota parsing and tracking.
//!
//! Servers advertise their quota through a `limit`/`remaining`/`reset` header
//! triple. Two spellings are common in the wild:
//!
//! - standard: `RateLimit-Limit`, `RateLimit-Remaining`, `RateLimit-Reset`
//! - vendor-prefixed: `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset`
//!
//! [`parse_quota`] turns such a triple into a [`QuotaSnapshot`], and
//! [`QuotaTracker`] keeps the newest snapshot seen during a run.
//!
//! # Example
//!
//! ```
//! use blobfetch_core::fetch::quota::parse_quota;
//! use reqwest::header::{HeaderMap, HeaderValue};
//!
//! let mut headers = HeaderMap::new();
//! headers.insert("x-ratelimit-limit", HeaderValue::from_static("3000"));
//! headers.insert("x-ratelimit-remaining", HeaderValue::from_static("2950"));
//! headers.insert("x-ratelimit-reset", HeaderValue::from_static("1760000000"));
//!
//! let snapshot = parse_quota(&headers).unwrap();
//! assert_eq!(snapshot.remaining, 2950);
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use reqwest::header::HeaderMap;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::constants::MAX_RETRY_AFTER;

/// Header name triples, checked in order. Lookups on `HeaderMap` are case-insensitive.
const QUOTA_HEADER_SETS: [QuotaHeaderNames; 2] = [
    QuotaHeaderNames {
        limit: "ratelimit-limit",
        remaining: "ratelimit-remaining",
        reset: "ratelimit-reset",
        policy: "ratelimit-policy",
    },
    QuotaHeaderNames {
        limit: "x-ratelimit-limit",
        remaining: "x-ratelimit-remaining",
        reset: "x-ratelimit-reset",
        policy: "x-ratelimit-policy",
    },
];

struct QuotaHeaderNames {
    limit: &'static str,
    remaining: &'static str,
    reset: &'static str,
    policy: &'static str,
}

/// Last known rate-limit state reported by the origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    /// Requests permitted in the current window.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the window resets, in epoch seconds.
    pub reset_at: u64,
    /// Free-form policy label (e.g. `3000;w=300`), when advertised.
    pub policy: Option<String>,
}

impl QuotaSnapshot {
    /// Fraction of the window already consumed, in `0.0..=1.0`.
    ///
    /// A zero limit counts as fully used.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn used_fraction(&self) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        let used = self.limit.saturating_sub(self.remaining);
        used as f64 / self.limit as f64
    }
}

/// Extracts a [`QuotaSnapshot`] from response headers.
///
/// Returns `None` unless all of limit, remaining and reset are present and
/// numeric under one naming convention. The policy label is optional.
#[must_use]
pub fn parse_quota(headers: &HeaderMap) -> Option<QuotaSnapshot> {
    QUOTA_HEADER_SETS.iter().find_map(|names| {
        let limit = numeric_header(headers, names.limit)?;
        let remaining = numeric_header(headers, names.remaining)?;
        let reset_at = numeric_header(headers, names.reset)?;
        let policy = headers
            .get(names.policy)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Some(QuotaSnapshot {
            limit,
            remaining,
            reset_at,
            policy,
        })
    })
}

fn numeric_header(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse::<u64>().ok()
}

/// Holds the newest [`QuotaSnapshot`] observed during one run.
///
/// Observations are ordered by the sequence number of the request that
/// produced them, so a slow response to an early request cannot overwrite
/// state reported by a later one.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    latest: Mutex<Option<(u64, QuotaSnapshot)>>,
}

impl QuotaTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `snapshot` if it comes from a request issued after the current one.
    ///
    /// Returns whether the snapshot was accepted.
    #[instrument(level = "debug", skip(self, snapshot), fields(remaining = snapshot.remaining))]
    pub fn observe(&self, sequence: u64, snapshot: QuotaSnapshot) -> bool {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        match latest.as_ref() {
            Some((current, _)) if *current >= sequence => {
                debug!(current, "ignoring stale quota observation");
                false
            }
            _ => {
                *latest = Some((sequence, snapshot));
                true
            }
        }
    }

    /// Returns a copy of the newest snapshot, if any.
    #[must_use]
    pub fn current(&self) -> Option<QuotaSnapshot> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, snapshot)| snapshot.clone())
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use blobfetch_core::fetch::quota::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let value = header_value.trim();
    let delay = match value.parse::<i64>() {
        Ok(seconds) => Duration::from_secs(u64::try_from(seconds).ok()?),
        Err(_) => {
            let at = httpdate::parse_http_date(value).ok()?;
            // A date already in the past means "retry now".
            at.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO)
        }
    };

    if delay > MAX_RETRY_AFTER {
        warn!(
            delay_secs = delay.as_secs(),
            max_secs = MAX_RETRY_AFTER.as_secs(),
            "Retry-After too long, capping"
        );
        return Some(MAX_RETRY_AFTER);
    }
    Some(delay)
}
