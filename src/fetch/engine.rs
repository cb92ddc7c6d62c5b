//! Adaptive batch fetch engine.
//!
//! # Overview
//!
//! [`FetchEngine::run`] retrieves every content id through a shared
//! [`ConcurrencyGate`]. Each item runs in its own Tokio task holding one gate
//! permit. Every `reevaluate_every` submissions the engine asks the
//! [`ThrottlePolicy`] for a recommendation based on the newest quota headers
//! and resizes the gate when the target concurrency changed.
//!
//! # Example
//!
//! ```no_run
//! use blobfetch_core::fetch::{FetchConfig, FetchEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = FetchEngine::new(FetchConfig::default())?;
//! let cancel = CancellationToken::new();
//! let report = engine
//!     .run(["bafy1", "bafy2"], |cid| format!("https://blobs.example/{cid}"), &cancel)
//!     .await?;
//! println!("{} fetched, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

mod task;

use self::task::RunContext;
use super::client::{HttpClient, Transport};
use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_BATCH_SIZE, DEFAULT_REEVALUATE_EVERY, READ_TIMEOUT_SECS,
};
use super::error::EngineError;
use super::gate::{ConcurrencyGate, MAX_CONCURRENCY, MIN_CONCURRENCY};
use super::progress::{LogLevel, NoopSink, ProgressEvent, ProgressSink, ProgressStage};
use super::report::{FetchItem, FetchReport, FetchResult};
use super::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};
use super::throttle::ThrottlePolicy;

/// Default number of in-flight fetches.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Unthrottled concurrency (1..=100).
    pub base_concurrency: usize,
    /// Attempts per item, including the first. Values below 1 count as 1.
    pub max_retries: u32,
    /// Items per scheduling batch.
    pub batch_size: usize,
    /// Submissions between throttle re-evaluations.
    pub reevaluate_every: usize,
    /// Backoff unit for transient failures.
    pub backoff_base: Duration,
    /// Wait for a 429 without a usable Retry-After.
    pub rate_limit_wait: Duration,
    /// Upper bound of random jitter added to transient backoff.
    pub retry_jitter: Duration,
    /// HTTP connect timeout.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout.
    pub read_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            base_concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_BATCH_SIZE,
            reevaluate_every: DEFAULT_REEVALUATE_EVERY,
            backoff_base: retry.backoff_base(),
            rate_limit_wait: retry.rate_limit_wait(),
            retry_jitter: Duration::ZERO,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl FetchConfig {
    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] for a base concurrency
    /// outside `1..=100` and [`EngineError::InvalidConfig`] for zero batch
    /// sizes, re-evaluation intervals or timeouts.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.base_concurrency) {
            return Err(EngineError::InvalidConcurrency {
                value: self.base_concurrency,
            });
        }
        let nonzero = [
            ("batch_size", self.batch_size as u64),
            ("reevaluate_every", self.reevaluate_every as u64),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
        ];
        for (field, value) in nonzero {
            if value == 0 {
                return Err(EngineError::InvalidConfig {
                    field,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Builds the retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_base, self.rate_limit_wait)
            .with_jitter(self.retry_jitter)
    }
}

/// Fetch engine with adaptive concurrency and retry support.
///
/// # Concurrency Model
///
/// - Each item runs in its own Tokio task
/// - A gate permit is acquired before spawning each task and held until it settles
/// - The gate bound is retuned from quota headers at submission checkpoints
/// - Each call to [`run`](Self::run) owns its gate and quota state
///
/// # Retry Behavior
///
/// - 404/410 fail immediately
/// - 429 waits for the server's Retry-After hint (2 s without one)
/// - Other failures back off linearly, up to `max_retries` attempts
pub struct FetchEngine {
    config: FetchConfig,
    retry_policy: RetryPolicy,
    throttle: ThrottlePolicy,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ProgressSink>,
}

impl fmt::Debug for FetchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEngine")
            .field("config", &self.config)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl FetchEngine {
    /// Creates an engine backed by [`HttpClient`].
    ///
    /// # Errors
    ///
    /// Returns the [`FetchConfig::validate`] error for invalid settings and
    /// [`EngineError::HttpClient`] if the client cannot be built.
    pub fn new(config: FetchConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let client =
            HttpClient::try_with_timeouts(config.connect_timeout_secs, config.read_timeout_secs)
                .map_err(EngineError::HttpClient)?;
        Ok(Self {
            retry_policy: config.retry_policy(),
            throttle: ThrottlePolicy::new(config.base_concurrency),
            config,
            transport: Arc::new(client),
            sink: Arc::new(NoopSink),
        })
    }

    /// Replaces the transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Replaces the progress sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetches every content id, returning one result per id in input order.
    ///
    /// `url_builder` maps a content id to the URL to request. Individual
    /// failures are reported in the results; they never fail the run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] with the partial report when
    /// `cancel` fires before every item settled.
    #[instrument(skip_all, fields(items = tracing::field::Empty))]
    pub async fn run<I, S, B>(
        &self,
        content_ids: I,
        url_builder: B,
        cancel: &CancellationToken,
    ) -> Result<FetchReport, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        B: Fn(&str) -> String,
    {
        let items: Vec<FetchItem> = content_ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| {
                let content_id = id.into();
                let url = url_builder(&content_id);
                FetchItem::new(index, content_id, url)
            })
            .collect();
        let total = items.len();
        tracing::Span::current().record("items", total);

        let initial = self.throttle.recommend(total, 0, None);
        let gate = ConcurrencyGate::new(initial.concurrency)?;
        if initial.should_throttle {
            info!(
                concurrency = initial.concurrency,
                reason = %initial.reason,
                "starting throttled"
            );
            self.sink.on_log(
                LogLevel::Info,
                &format!(
                    "Starting at concurrency {}: {}",
                    initial.concurrency, initial.reason
                ),
            );
        }
        info!(total, concurrency = gate.bound(), "starting fetch run");

        let content_ids: Vec<String> = items.iter().map(|item| item.content_id.clone()).collect();
        let ctx = Arc::new(RunContext::new(
            total,
            Arc::clone(&self.transport),
            Arc::clone(&self.sink),
            self.retry_policy.clone(),
            cancel.clone(),
            initial,
        ));

        let every = self.config.reevaluate_every;
        let mut next_reevaluation = every;
        let mut handles: Vec<JoinHandle<FetchResult>> = Vec::with_capacity(total);
        let mut pending = items.into_iter();

        'batches: loop {
            let batch: Vec<FetchItem> = pending.by_ref().take(self.config.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            debug!(start = handles.len(), size = batch.len(), "submitting batch");

            for item in batch {
                // Race the permit wait against cancellation so Ctrl+C at full
                // concurrency stops submitting immediately.
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        warn!(submitted = handles.len(), total, "cancelled, no further submissions");
                        break 'batches;
                    }
                    permit = gate.acquire() => permit,
                };

                let task_ctx = Arc::clone(&ctx);
                handles.push(tokio::spawn(async move {
                    // Permit is dropped when this block exits (RAII)
                    let _permit = permit;
                    task::fetch_item(&task_ctx, item).await
                }));

                // Counted in submissions, independent of batch boundaries.
                if handles.len() >= next_reevaluation {
                    self.reevaluate(&ctx, &gate);
                    next_reevaluation += every;
                }
            }
        }

        debug!(task_count = handles.len(), "waiting for fetches to settle");

        let mut results = Vec::with_capacity(total);
        let mut handles = handles.into_iter();
        for content_id in content_ids {
            let result = match handles.next() {
                Some(handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => task::join_error_result(&ctx, content_id, &e),
                },
                None => FetchResult::cancelled(content_id),
            };
            results.push(result);
        }

        let cancelled = results.iter().any(FetchResult::is_cancelled);
        let report =
            FetchReport::from_results(results, ctx.quota.current(), ctx.retried(), cancelled);

        self.sink.on_progress(&ProgressEvent {
            completed: report.settled(),
            total,
            stage: ProgressStage::Finished,
        });
        self.log_summary(&report);

        if cancelled {
            return Err(EngineError::Cancelled(Box::new(report)));
        }
        Ok(report)
    }

    /// Recomputes the throttle decision and resizes the gate if needed.
    fn reevaluate(&self, ctx: &RunContext, gate: &ConcurrencyGate) {
        let snapshot = ctx.quota.current();
        let decision = self
            .throttle
            .recommend(ctx.total, ctx.completed(), snapshot.as_ref());
        let previous = gate.bound();

        if decision.concurrency == previous {
            debug!(tier = %decision.tier, concurrency = previous, "throttle unchanged");
        } else {
            match gate.resize(decision.concurrency) {
                Ok(()) => {
                    info!(
                        previous,
                        concurrency = decision.concurrency,
                        tier = %decision.tier,
                        reason = %decision.reason,
                        "adjusted concurrency"
                    );
                    let level = if decision.concurrency < previous {
                        LogLevel::Warn
                    } else {
                        LogLevel::Info
                    };
                    ctx.sink.on_log(
                        level,
                        &format!(
                            "Concurrency {previous} -> {}: {}",
                            decision.concurrency, decision.reason
                        ),
                    );
                }
                Err(e) => warn!(error = %e, "ignoring throttle recommendation"),
            }
        }

        ctx.set_decision(decision);
    }

    fn log_summary(&self, report: &FetchReport) {
        let quota = report.quota().map_or_else(
            || "no quota reported".to_string(),
            |q| format!("quota {}/{} remaining", q.remaining, q.limit),
        );
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            retried = report.retried(),
            quota = %quota,
            "fetch run finished"
        );

        let mut message = format!(
            "Fetched {} of {}, {} failed",
            report.succeeded(),
            report.len(),
            report.failed()
        );
        if report.was_cancelled() {
            message.push_str(&format!(", {} cancelled", report.cancelled()));
        }
        message.push_str(&format!(" ({quota})"));

        let level = if report.was_cancelled() || report.failed() > 0 {
            LogLevel::Warn
        } else {
            LogLevel::Success
        };
        self.sink.on_log(level, &message);
    }
}
