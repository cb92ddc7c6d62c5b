//! Progress and log callbacks for fetch runs.
//!
//! The engine reports through a [`ProgressSink`]. Callbacks run inline on the
//! engine's tasks, so implementations must return quickly.

use std::fmt;

use serde::Serialize;

/// What a [`ProgressEvent`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// An item settled while the run is still going.
    Fetching,
    /// Every item settled (or the run was cancelled).
    Finished,
}

impl fmt::Display for ProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetching => f.write_str("fetching"),
            Self::Finished => f.write_str("finished"),
        }
    }
}

/// One unit of observable progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Items settled so far.
    pub completed: usize,
    /// Items in the run.
    pub total: usize,
    /// Stage label.
    pub stage: ProgressStage,
}

/// Severity of a user-facing log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Something degraded (throttling, failures).
    Warn,
    /// Something failed.
    Error,
    /// The run finished cleanly.
    Success,
}

/// Receives progress events and user-facing log lines.
///
/// Both methods default to doing nothing.
pub trait ProgressSink: Send + Sync {
    /// Called once per settled item, then once more when the run finishes.
    fn on_progress(&self, _event: &ProgressEvent) {}

    /// Called for concurrency changes and the final summary.
    fn on_log(&self, _level: LogLevel, _message: &str) {}
}

/// A sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressSink for Recording {
        fn on_progress(&self, event: &ProgressEvent) {
            self.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(*event);
        }
    }

    #[test]
    fn test_noop_sink_accepts_calls() {
        let sink = NoopSink;
        sink.on_progress(&ProgressEvent {
            completed: 1,
            total: 2,
            stage: ProgressStage::Fetching,
        });
        sink.on_log(LogLevel::Info, "ignored");
    }

    #[test]
    fn test_default_on_log_is_optional() {
        let sink = Recording::default();
        sink.on_log(LogLevel::Warn, "not recorded");
        sink.on_progress(&ProgressEvent {
            completed: 2,
            total: 2,
            stage: ProgressStage::Finished,
        });
        let events = sink.events.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, ProgressStage::Finished);
    }

    #[test]
    fn test_progress_stage_display() {
        assert_eq!(ProgressStage::Fetching.to_string(), "fetching");
        assert_eq!(ProgressStage::Finished.to_string(), "finished");
    }
}
