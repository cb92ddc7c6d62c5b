//! Rate-limit aware batch fetching of content-addressed blobs.
//!
//! This module retrieves many objects from one origin while adapting its
//! concurrency to the quota the origin reports in response headers.
//!
//! # Features
//!
//! - Resizable concurrency gate with FIFO admission
//! - Quota parsing for both `RateLimit-*` and `X-RateLimit-*` headers
//! - Tiered throttle policy, re-evaluated as work is submitted
//! - Retry with Retry-After support for 429 and linear backoff otherwise
//! - Cooperative cancellation with partial results
//!
//! # Example
//!
//! ```no_run
//! use blobfetch_core::fetch::{FetchConfig, FetchEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = FetchEngine::new(FetchConfig::default())?;
//! let report = engine
//!     .run(
//!         vec!["bafyA".to_string(), "bafyB".to_string()],
//!         |cid| format!("https://blobs.example/{cid}"),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! for result in report.results() {
//!     println!("{}: success={}", result.content_id, result.is_success());
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
pub mod gate;
mod progress;
pub mod quota;
mod report;
mod retry;
pub mod throttle;

pub use client::{HttpClient, Transport, TransportResponse, default_user_agent};
pub use constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_REEVALUATE_EVERY, LARGE_JOB_CONCURRENCY, LARGE_JOB_THRESHOLD,
};
pub use engine::{DEFAULT_CONCURRENCY, FetchConfig, FetchEngine};
pub use error::{EngineError, FetchError};
pub use gate::{ConcurrencyGate, GatePermit, MAX_CONCURRENCY, MIN_CONCURRENCY};
pub use progress::{LogLevel, NoopSink, ProgressEvent, ProgressSink, ProgressStage};
pub use quota::{QuotaSnapshot, QuotaTracker, parse_quota, parse_retry_after};
pub use report::{FailureSummary, FetchItem, FetchOutcome, FetchReport, FetchResult, FetchSummary};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    classify_http_status,
};
pub use throttle::{ThrottleDecision, ThrottlePolicy, ThrottleTier};
