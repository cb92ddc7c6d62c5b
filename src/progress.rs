//! Terminal progress bar for fetch runs.

use std::io::IsTerminal;

use blobfetch_core::fetch::{LogLevel, ProgressEvent, ProgressSink, ProgressStage};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::{error, info, warn};

/// Returns whether a progress bar should be drawn.
pub(crate) fn should_use_progress_bar(
    stderr_is_terminal: bool,
    quiet: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

/// [`ProgressSink`] drawing an indicatif bar on stderr.
///
/// Log lines are printed above the bar when it is visible and go to
/// `tracing` otherwise.
#[derive(Debug)]
pub(crate) struct BarSink {
    bar: ProgressBar,
    visible: bool,
}

impl BarSink {
    pub(crate) fn new(total: usize, quiet: bool) -> Self {
        let visible =
            should_use_progress_bar(std::io::stderr().is_terminal(), quiet, is_dumb_terminal());
        Self::with_visibility(total, visible)
    }

    fn with_visibility(total: usize, visible: bool) -> Self {
        let bar = ProgressBar::with_draw_target(
            Some(total as u64),
            if visible {
                ProgressDrawTarget::stderr()
            } else {
                ProgressDrawTarget::hidden()
            },
        );
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar, visible }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressSink for BarSink {
    fn on_progress(&self, event: &ProgressEvent) {
        self.bar.set_position(event.completed as u64);
        if event.stage == ProgressStage::Finished {
            self.bar.set_message("done");
        }
    }

    fn on_log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info | LogLevel::Success if self.visible => {
                self.bar.set_message(message.to_string());
            }
            LogLevel::Warn if self.visible => self.bar.println(format!("warning: {message}")),
            LogLevel::Error if self.visible => self.bar.println(format!("error: {message}")),
            LogLevel::Info | LogLevel::Success => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
    }
}
