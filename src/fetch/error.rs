//! Error types for the fetch module.
//!
//! [`FetchError`] describes why a single attempt against the origin failed and
//! is what ends up (as a message) inside a failed [`FetchResult`](super::FetchResult).
//! [`EngineError`] covers the few conditions that abort a whole run.

use thiserror::Error;

use super::report::FetchReport;
use super::gate::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Errors that can occur during a single fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The object does not exist upstream (404/410). Never retried.
    #[error("not found: {url} (HTTP {status})")]
    NotFound {
        /// The URL that was not found.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Any other non-success HTTP response.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// The URL produced by the URL builder is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl FetchError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a not-found error.
    pub fn not_found(url: impl Into<String>, status: u16) -> Self {
        Self::NotFound {
            url: url.into(),
            status,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

// No `From<reqwest::Error>`: every variant needs the URL for context, so callers
// go through the constructors above.

/// Errors that abort an engine run or reject its configuration.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// A configuration field other than concurrency is out of range.
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// The cancellation signal fired before every item settled.
    ///
    /// Carries the partial report: items that settled keep their results, the
    /// rest are marked cancelled.
    #[error("fetch run cancelled after {} of {} items settled", .0.settled(), .0.len())]
    Cancelled(Box<FetchReport>),
}

impl EngineError {
    /// Returns the partial report when the run was cancelled.
    #[must_use]
    pub fn into_partial_report(self) -> Option<FetchReport> {
        match self {
            Self::Cancelled(report) => Some(*report),
            _ => None,
        }
    }
}
