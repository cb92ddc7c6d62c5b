//! Writing payloads and printing the run summary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blobfetch_core::fetch::FetchReport;
use tracing::debug;

/// Process exit outcome, mapped to an exit code in `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every item was fetched.
    Success,
    /// Some items were fetched, some failed.
    Partial,
    /// Nothing was fetched.
    Failure,
    /// The run was cancelled.
    Interrupted,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
            Self::Interrupted => 130,
        }
    }
}

/// Maps a report to the process exit outcome.
pub(crate) fn determine_exit_outcome(report: &FetchReport) -> ProcessExit {
    if report.was_cancelled() {
        ProcessExit::Interrupted
    } else if report.failed() == 0 {
        ProcessExit::Success
    } else if report.succeeded() > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

/// Writes every fetched payload to `<output_dir>/<content-id>`.
///
/// Content ids are sanitized so they cannot escape `output_dir`.
pub(crate) async fn write_payloads(report: &FetchReport, output_dir: &Path) -> Result<usize> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;

    let mut written = 0;
    for result in report.results() {
        let Some(payload) = result.payload() else {
            continue;
        };
        let path = payload_path(output_dir, &result.content_id);
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        debug!(path = %path.display(), bytes = payload.len(), "wrote payload");
        written += 1;
    }
    Ok(written)
}

fn payload_path(output_dir: &Path, content_id: &str) -> PathBuf {
    let name: String = content_id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    let name = match name.as_str() {
        "" | "." | ".." => format!("_{name}"),
        _ => name,
    };
    output_dir.join(name)
}

/// Renders the human-readable summary.
pub(crate) fn render_text_summary(report: &FetchReport) -> String {
    let mut lines = vec![format!(
        "{} fetched, {} failed, {} cancelled ({} total, {} retries)",
        report.succeeded(),
        report.failed(),
        report.cancelled(),
        report.len(),
        report.retried()
    )];
    if let Some(quota) = report.quota() {
        lines.push(format!(
            "quota: {}/{} remaining, resets at {}",
            quota.remaining, quota.limit, quota.reset_at
        ));
    }
    for result in report.results() {
        if let Some(error) = result.error() {
            lines.push(format!(
                "  failed {} after {} attempt(s): {error}",
                result.content_id, result.attempts
            ));
        }
    }
    lines.join("\n")
}

/// Renders the JSON summary.
pub(crate) fn render_json_summary(report: &FetchReport) -> Result<String> {
    serde_json::to_string_pretty(&report.summary()).context("Failed to serialize summary")
}
