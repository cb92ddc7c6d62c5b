//! Per-item attempt loop and the state shared by one run's tasks.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::fetch::client::{Transport, TransportResponse};
use crate::fetch::constants::{QUOTA_PROBE_RESPONSES, QUOTA_REFRESH_INTERVAL};
use crate::fetch::error::FetchError;
use crate::fetch::progress::{ProgressEvent, ProgressSink, ProgressStage};
use crate::fetch::quota::{QuotaTracker, parse_quota, parse_retry_after};
use crate::fetch::report::{FetchItem, FetchOutcome, FetchResult};
use crate::fetch::retry::{
    FailureType, RetryDecision, RetryPolicy, classify_error, classify_http_status,
};
use crate::fetch::throttle::ThrottleDecision;

/// State owned by one `run` invocation and shared with its tasks.
pub(super) struct RunContext {
    pub(super) total: usize,
    pub(super) quota: QuotaTracker,
    pub(super) sink: Arc<dyn ProgressSink>,
    transport: Arc<dyn Transport>,
    retry_policy: RetryPolicy,
    cancel: CancellationToken,
    decision: Mutex<ThrottleDecision>,
    sequence: AtomicU64,
    responses_seen: AtomicUsize,
    completed: AtomicUsize,
    retried: AtomicUsize,
}

impl RunContext {
    pub(super) fn new(
        total: usize,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ProgressSink>,
        retry_policy: RetryPolicy,
        cancel: CancellationToken,
        decision: ThrottleDecision,
    ) -> Self {
        Self {
            total,
            quota: QuotaTracker::new(),
            sink,
            transport,
            retry_policy,
            cancel,
            decision: Mutex::new(decision),
            sequence: AtomicU64::new(0),
            responses_seen: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            retried: AtomicUsize::new(0),
        }
    }

    pub(super) fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub(super) fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    pub(super) fn set_decision(&self, decision: ThrottleDecision) {
        *self.decision.lock().unwrap_or_else(PoisonError::into_inner) = decision;
    }

    fn success_delay(&self) -> Duration {
        self.decision
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .delay
    }

    fn record_completion(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.sink.on_progress(&ProgressEvent {
            completed,
            total: self.total,
            stage: ProgressStage::Fetching,
        });
    }

    /// Reads rate-limit headers from the first few responses, every Nth one
    /// after that, and every 429.
    fn observe_quota(&self, sequence: u64, response: &TransportResponse) {
        let seen = self.responses_seen.fetch_add(1, Ordering::SeqCst) + 1;
        let inspect = seen <= QUOTA_PROBE_RESPONSES
            || seen % QUOTA_REFRESH_INTERVAL == 0
            || response.status == 429;
        if !inspect {
            return;
        }
        if let Some(snapshot) = parse_quota(&response.headers) {
            let remaining = snapshot.remaining;
            if self.quota.observe(sequence, snapshot) {
                debug!(sequence, remaining, "quota updated");
            }
        }
    }

    async fn pause_after_success(&self) {
        let delay = self.success_delay();
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Fetches one item with retries and reports its completion.
#[instrument(level = "debug", skip(ctx, item), fields(index = item.index, content_id = %item.content_id))]
pub(super) async fn fetch_item(ctx: &RunContext, mut item: FetchItem) -> FetchResult {
    let outcome = fetch_with_retry(ctx, &mut item).await;
    if !matches!(outcome, FetchOutcome::Cancelled) {
        ctx.record_completion();
    }
    FetchResult::from_item(item, outcome)
}

async fn fetch_with_retry(ctx: &RunContext, item: &mut FetchItem) -> FetchOutcome {
    loop {
        if ctx.cancel.is_cancelled() {
            debug!(attempts = item.attempts, "cancelled before attempt");
            return FetchOutcome::Cancelled;
        }

        item.attempts += 1;
        let sequence = ctx.sequence.fetch_add(1, Ordering::SeqCst);
        debug!(attempt = item.attempts, url = %item.url, "fetching");

        let response = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return FetchOutcome::Cancelled,
            response = ctx.transport.get(&item.url) => response,
        };

        let error = match response {
            Ok(response) => {
                ctx.observe_quota(sequence, &response);
                if response.is_success() {
                    ctx.pause_after_success().await;
                    let content_type = response.content_type();
                    return FetchOutcome::Fetched {
                        payload: response.body,
                        content_type,
                    };
                }
                status_error(&item.url, &response)
            }
            Err(error) => error,
        };

        let retry_after = match &error {
            FetchError::HttpStatus {
                retry_after: Some(value),
                ..
            } => parse_retry_after(value),
            _ => None,
        };

        match ctx
            .retry_policy
            .should_retry(classify_error(&error), item.attempts, retry_after)
        {
            RetryDecision::Retry { delay, attempt } => {
                ctx.retried.fetch_add(1, Ordering::SeqCst);
                warn!(
                    error = %error,
                    next_attempt = attempt,
                    delay_ms = delay.as_millis(),
                    "attempt failed, retrying"
                );
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => return FetchOutcome::Cancelled,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                warn!(error = %error, attempts = item.attempts, reason = %reason, "giving up");
                return FetchOutcome::Failed {
                    error: error.to_string(),
                };
            }
        }
    }
}

fn status_error(url: &str, response: &TransportResponse) -> FetchError {
    match classify_http_status(response.status) {
        FailureType::NotFound => FetchError::not_found(url, response.status),
        _ => FetchError::http_status_with_retry_after(
            url,
            response.status,
            response
                .headers
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        ),
    }
}

/// Converts a task that did not return (panic or abort) into a result.
pub(super) fn join_error_result(
    ctx: &RunContext,
    content_id: String,
    error: &JoinError,
) -> FetchResult {
    if error.is_cancelled() {
        return FetchResult::cancelled(content_id);
    }
    warn!(content_id = %content_id, error = %error, "fetch task panicked");
    ctx.record_completion();
    FetchResult {
        content_id,
        attempts: 0,
        outcome: FetchOutcome::Failed {
            error: format!("fetch task panicked: {error}"),
        },
    }
}
