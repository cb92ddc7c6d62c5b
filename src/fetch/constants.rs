//! Constants for the fetch module (timeouts, scheduling checkpoints, quota probing).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large blobs).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Items per scheduling batch. Batches are re-evaluation checkpoints only.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Submissions between throttle re-evaluations.
pub const DEFAULT_REEVALUATE_EVERY: usize = 100;

/// Jobs above this many items are treated as bulk jobs.
pub const LARGE_JOB_THRESHOLD: usize = 1000;

/// Starting concurrency for bulk jobs before any quota signal arrives.
pub const LARGE_JOB_CONCURRENCY: usize = 2;

/// Responses always inspected for rate-limit headers at the start of a run.
pub const QUOTA_PROBE_RESPONSES: usize = 5;

/// After the probe window, headers are re-read on every Nth response.
pub const QUOTA_REFRESH_INTERVAL: usize = 10;

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
