//! Per-item outcomes and the aggregate report returned by a run.

use serde::Serialize;

use super::quota::QuotaSnapshot;

/// One object to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchItem {
    /// Position in the caller's input.
    pub index: usize,
    /// Opaque identifier of the object.
    pub content_id: String,
    /// URL produced by the caller's URL builder.
    pub url: String,
    /// Attempts issued so far.
    pub attempts: u32,
}

impl FetchItem {
    /// Creates an item that has not been attempted yet.
    #[must_use]
    pub fn new(index: usize, content_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            index,
            content_id: content_id.into(),
            url: url.into(),
            attempts: 0,
        }
    }
}

/// Terminal state of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The object was retrieved.
    Fetched {
        /// Response body.
        payload: Vec<u8>,
        /// Content-Type reported by the origin.
        content_type: Option<String>,
    },
    /// Every permitted attempt failed, or the failure was terminal.
    Failed {
        /// Message of the last error observed.
        error: String,
    },
    /// The run was cancelled before this item settled.
    Cancelled,
}

/// Outcome for one input item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// Identifier of the object.
    pub content_id: String,
    /// Attempts issued for this item.
    pub attempts: u32,
    /// What happened.
    pub outcome: FetchOutcome,
}

impl FetchResult {
    /// Builds a result from a settled item.
    #[must_use]
    pub fn from_item(item: FetchItem, outcome: FetchOutcome) -> Self {
        Self {
            content_id: item.content_id,
            attempts: item.attempts,
            outcome,
        }
    }

    /// Builds a cancelled result for an item that never started.
    #[must_use]
    pub fn cancelled(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            attempts: 0,
            outcome: FetchOutcome::Cancelled,
        }
    }

    /// Returns true if the payload was retrieved.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Fetched { .. })
    }

    /// Returns true if the item failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Failed { .. })
    }

    /// Returns true if the item was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Cancelled)
    }

    /// Returns the payload for fetched items.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.outcome {
            FetchOutcome::Fetched { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Returns the content type for fetched items, when known.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        match &self.outcome {
            FetchOutcome::Fetched { content_type, .. } => content_type.as_deref(),
            _ => None,
        }
    }

    /// Returns the error message for failed items.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            FetchOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Results of one run, in input order.
#[derive(Debug, Clone)]
pub struct FetchReport {
    results: Vec<FetchResult>,
    quota: Option<QuotaSnapshot>,
    retried: usize,
    cancelled: bool,
}

impl FetchReport {
    /// Assembles a report. `results` must already be in input order.
    #[must_use]
    pub fn from_results(
        results: Vec<FetchResult>,
        quota: Option<QuotaSnapshot>,
        retried: usize,
        cancelled: bool,
    ) -> Self {
        Self {
            results,
            quota,
            retried,
            cancelled,
        }
    }

    /// Returns every result, in input order.
    #[must_use]
    pub fn results(&self) -> &[FetchResult] {
        &self.results
    }

    /// Consumes the report, returning the results.
    #[must_use]
    pub fn into_results(self) -> Vec<FetchResult> {
        self.results
    }

    /// Number of input items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true for a run over no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of items that were fetched.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Number of items that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failure()).count()
    }

    /// Number of items cancelled before they settled.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.results.iter().filter(|r| r.is_cancelled()).count()
    }

    /// Number of items that reached a final success or failure.
    #[must_use]
    pub fn settled(&self) -> usize {
        self.len() - self.cancelled()
    }

    /// Number of retries issued across all items.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried
    }

    /// Last quota state reported by the origin.
    #[must_use]
    pub fn quota(&self) -> Option<&QuotaSnapshot> {
        self.quota.as_ref()
    }

    /// Returns true if the run was stopped by its cancellation signal.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Returns a serialisable summary without payloads.
    #[must_use]
    pub fn summary(&self) -> FetchSummary {
        FetchSummary {
            total: self.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            cancelled: self.cancelled(),
            retried: self.retried,
            was_cancelled: self.cancelled,
            quota: self.quota.clone(),
            failures: self
                .results
                .iter()
                .filter_map(|r| {
                    r.error().map(|error| FailureSummary {
                        content_id: r.content_id.clone(),
                        attempts: r.attempts,
                        error: error.to_string(),
                    })
                })
                .collect(),
        }
    }
}

/// Counts and failure reasons for a run.
#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    /// Number of input items.
    pub total: usize,
    /// Items fetched.
    pub succeeded: usize,
    /// Items failed.
    pub failed: usize,
    /// Items cancelled.
    pub cancelled: usize,
    /// Retries issued.
    pub retried: usize,
    /// Whether the run was cancelled.
    pub was_cancelled: bool,
    /// Last known quota.
    pub quota: Option<QuotaSnapshot>,
    /// One entry per failed item.
    pub failures: Vec<FailureSummary>,
}

/// A failed item in a [`FetchSummary`].
#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    /// Identifier of the object.
    pub content_id: String,
    /// Attempts issued.
    pub attempts: u32,
    /// Last error message.
    pub error: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fetched(id: &str) -> FetchResult {
        FetchResult {
            content_id: id.to_string(),
            attempts: 1,
            outcome: FetchOutcome::Fetched {
                payload: b"blob".to_vec(),
                content_type: Some("application/octet-stream".to_string()),
            },
        }
    }

    fn failed(id: &str, attempts: u32) -> FetchResult {
        FetchResult {
            content_id: id.to_string(),
            attempts,
            outcome: FetchOutcome::Failed {
                error: "HTTP 503 fetching https://blobs.example/x".to_string(),
            },
        }
    }

    #[test]
    fn test_fetch_item_starts_unattempted() {
        let item = FetchItem::new(4, "bafy", "https://blobs.example/bafy");
        assert_eq!(item.index, 4);
        assert_eq!(item.attempts, 0);
    }

    #[test]
    fn test_fetch_result_accessors() {
        let ok = fetched("a");
        assert!(ok.is_success());
        assert_eq!(ok.payload(), Some(&b"blob"[..]));
        assert_eq!(ok.content_type(), Some("application/octet-stream"));
        assert!(ok.error().is_none());

        let bad = failed("b", 3);
        assert!(bad.is_failure());
        assert!(bad.payload().is_none());
        assert!(bad.error().unwrap().contains("503"));

        let skipped = FetchResult::cancelled("c");
        assert!(skipped.is_cancelled());
        assert_eq!(skipped.attempts, 0);
    }

    #[test]
    fn test_report_counts() {
        let report = FetchReport::from_results(
            vec![fetched("a"), failed("b", 3), FetchResult::cancelled("c"), fetched("d")],
            None,
            2,
            true,
        );
        assert_eq!(report.len(), 4);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.cancelled(), 1);
        assert_eq!(report.settled(), 3);
        assert_eq!(report.retried(), 2);
        assert!(report.was_cancelled());
    }

    #[test]
    fn test_report_summary_serializes_without_payloads() {
        let quota = QuotaSnapshot {
            limit: 3000,
            remaining: 2500,
            reset_at: 1_700_000_000,
            policy: None,
        };
        let report =
            FetchReport::from_results(vec![fetched("a"), failed("b", 3)], Some(quota), 2, false);
        let json = serde_json::to_value(report.summary()).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["failures"][0]["content_id"], "b");
        assert_eq!(json["failures"][0]["attempts"], 3);
        assert_eq!(json["quota"]["remaining"], 2500);
        assert!(!json.to_string().contains("blob\""));
    }

    #[test]
    fn test_report_into_results_preserves_order() {
        let report = FetchReport::from_results(vec![fetched("x"), fetched("y")], None, 0, false);
        let ids: Vec<String> = report.into_results().into_iter().map(|r| r.content_id).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }
}
