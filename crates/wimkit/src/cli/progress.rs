//! Terminal rendering of native progress events.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::imaging::ProgressSink;

/// [`ProgressSink`] drawing an `indicatif` bar, or a spinner while the
/// native layer reports no total.
#[derive(Debug)]
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    /// Create a 0-100 bar labelled `message`.
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// A sink that draws nothing, for non-interactive output.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Complete the bar, leaving `message` on screen.
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Remove the bar without a final message.
    pub fn abandon(&self) {
        self.bar.abandon();
    }

    /// Current bar position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressSink for ProgressBarSink {
    fn report(&self, percentage: i32, _message: &str) {
        match u64::try_from(percentage) {
            Ok(pct) => self.bar.set_position(pct.min(100)),
            Err(_) => self.bar.tick(),
        }
    }
}
