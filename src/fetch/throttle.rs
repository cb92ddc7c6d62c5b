//! Throttle policy: turns progress and quota state into operating parameters.
//!
//! [`ThrottlePolicy::recommend`] is a pure function of its inputs. Tiers are
//! evaluated top to bottom and the first match wins:
//!
//! | Tier | Condition | Concurrency | Delay |
//! |------|-----------|-------------|-------|
//! | [`ThrottleTier::LargeJobNoSignal`] | no snapshot, > 1000 items | 2 | 0 |
//! | [`ThrottleTier::NoSignal`] | no snapshot | base | 0 |
//! | [`ThrottleTier::Critical`] | remaining < 100 or used > 90% | 1 | 2000 ms |
//! | [`ThrottleTier::Caution`] | remaining < 500 or used > 70% | 1 | 1000 ms |
//! | [`ThrottleTier::Pacing`] | items left > 0.8 × remaining | 2 | 500 ms |
//! | [`ThrottleTier::Proactive`] | > 1000 items and > 500 done | 2 | 200 ms |
//! | [`ThrottleTier::Headroom`] | otherwise | base | 0 |
//!
//! Tier concurrency values are ceilings and never exceed the base concurrency.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::constants::{LARGE_JOB_CONCURRENCY, LARGE_JOB_THRESHOLD};
use super::quota::QuotaSnapshot;

const CRITICAL_REMAINING: u64 = 100;
const CRITICAL_USED_FRACTION: f64 = 0.90;
const CRITICAL_DELAY: Duration = Duration::from_millis(2000);

const CAUTION_REMAINING: u64 = 500;
const CAUTION_USED_FRACTION: f64 = 0.70;
const CAUTION_DELAY: Duration = Duration::from_millis(1000);

/// Share of the remaining quota the rest of the job may consume before pacing kicks in.
const PACING_QUOTA_SHARE: f64 = 0.8;
const PACING_DELAY: Duration = Duration::from_millis(500);

/// Completed items after which a large job switches to proactive throttling.
const PROACTIVE_COMPLETED: usize = 500;
const PROACTIVE_DELAY: Duration = Duration::from_millis(200);

/// Which branch of the policy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleTier {
    /// Bulk job with no quota signal yet.
    LargeJobNoSignal,
    /// Small job with no quota signal yet.
    NoSignal,
    /// Quota nearly exhausted.
    Critical,
    /// Quota running low.
    Caution,
    /// Remaining work would exhaust the quota at the current pace.
    Pacing,
    /// Large job past its halfway mark.
    Proactive,
    /// Plenty of quota left.
    Headroom,
}

impl ThrottleTier {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LargeJobNoSignal => "large-job-no-signal",
            Self::NoSignal => "no-signal",
            Self::Critical => "critical",
            Self::Caution => "caution",
            Self::Pacing => "pacing",
            Self::Proactive => "proactive",
            Self::Headroom => "headroom",
        }
    }
}

impl fmt::Display for ThrottleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recommended operating parameters for the rest of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleDecision {
    /// Policy branch that matched.
    pub tier: ThrottleTier,
    /// Whether the run should operate below its base settings.
    pub should_throttle: bool,
    /// Target number of in-flight fetches.
    pub concurrency: usize,
    /// Pause applied after each successful fetch.
    #[serde(serialize_with = "serialize_millis")]
    pub delay: Duration,
    /// Human-readable explanation.
    pub reason: String,
}

#[allow(clippy::trivially_copy_pass_by_ref, clippy::cast_possible_truncation)]
fn serialize_millis<S: serde::Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(delay.as_millis() as u64)
}

/// The throttle policy for one engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    base_concurrency: usize,
}

impl ThrottlePolicy {
    /// Creates a policy whose unthrottled concurrency is `base_concurrency`.
    #[must_use]
    pub fn new(base_concurrency: usize) -> Self {
        Self {
            base_concurrency: base_concurrency.max(1),
        }
    }

    /// Returns the unthrottled concurrency.
    #[must_use]
    pub fn base_concurrency(&self) -> usize {
        self.base_concurrency
    }

    /// Recommends operating parameters for a job of `total_items` with
    /// `completed` items settled and the newest known quota `snapshot`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn recommend(
        &self,
        total_items: usize,
        completed: usize,
        snapshot: Option<&QuotaSnapshot>,
    ) -> ThrottleDecision {
        let large_job = total_items > LARGE_JOB_THRESHOLD;

        let Some(quota) = snapshot else {
            if large_job {
                return self.throttled(
                    ThrottleTier::LargeJobNoSignal,
                    LARGE_JOB_CONCURRENCY,
                    Duration::ZERO,
                    format!("large job ({total_items} items) with no rate-limit signal yet"),
                );
            }
            return self.unthrottled(
                ThrottleTier::NoSignal,
                "no rate-limit signal yet".to_string(),
            );
        };

        let used = quota.used_fraction();
        let remaining = quota.remaining;

        if remaining < CRITICAL_REMAINING || used > CRITICAL_USED_FRACTION {
            return self.throttled(
                ThrottleTier::Critical,
                1,
                CRITICAL_DELAY,
                format!(
                    "quota critical: {remaining}/{} remaining ({:.0}% used)",
                    quota.limit,
                    used * 100.0
                ),
            );
        }

        if remaining < CAUTION_REMAINING || used > CAUTION_USED_FRACTION {
            return self.throttled(
                ThrottleTier::Caution,
                1,
                CAUTION_DELAY,
                format!(
                    "quota low: {remaining}/{} remaining ({:.0}% used)",
                    quota.limit,
                    used * 100.0
                ),
            );
        }

        let items_left = total_items.saturating_sub(completed);
        if items_left as f64 > PACING_QUOTA_SHARE * remaining as f64 {
            return self.throttled(
                ThrottleTier::Pacing,
                2,
                PACING_DELAY,
                format!("{items_left} items left would exhaust {remaining} remaining requests"),
            );
        }

        if large_job && completed > PROACTIVE_COMPLETED {
            return self.throttled(
                ThrottleTier::Proactive,
                2,
                PROACTIVE_DELAY,
                format!("large job past {completed}/{total_items} items, pacing proactively"),
            );
        }

        self.unthrottled(
            ThrottleTier::Headroom,
            format!("{remaining}/{} requests remaining", quota.limit),
        )
    }

    fn throttled(
        &self,
        tier: ThrottleTier,
        concurrency: usize,
        delay: Duration,
        reason: String,
    ) -> ThrottleDecision {
        ThrottleDecision {
            tier,
            should_throttle: true,
            concurrency: concurrency.min(self.base_concurrency),
            delay,
            reason,
        }
    }

    fn unthrottled(&self, tier: ThrottleTier, reason: String) -> ThrottleDecision {
        ThrottleDecision {
            tier,
            should_throttle: false,
            concurrency: self.base_concurrency,
            delay: Duration::ZERO,
            reason,
        }
    }
}
