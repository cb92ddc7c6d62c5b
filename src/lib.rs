//! Blobfetch Core Library
//!
//! This library retrieves large batches of content-addressed blobs from a
//! single origin while staying inside the rate limit the origin reports.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Adaptive fetch engine (concurrency gate, quota model, retries)
//! - [`cache`] - TTL cache with in-flight request deduplication

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod fetch;

// Re-export commonly used types
pub use cache::{CacheError, TtlCache};
pub use fetch::{
    ConcurrencyGate, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, EngineError, FailureType,
    FetchConfig, FetchEngine, FetchError, FetchOutcome, FetchReport, FetchResult, HttpClient,
    LogLevel, ProgressEvent, ProgressSink, QuotaSnapshot, RetryDecision, RetryPolicy,
    ThrottleDecision, ThrottlePolicy, ThrottleTier, Transport, TransportResponse,
    classify_error,
};
