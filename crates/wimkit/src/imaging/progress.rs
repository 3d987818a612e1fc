//! Progress reporting across the native boundary.
//!
//! Native progress callbacks run on threads owned by the imaging subsystem.
//! [`ProgressTrampoline`] is the object registered there: it converts raw
//! ticks into a percentage and never lets a panic from the sink escape.

use std::panic::{self, AssertUnwindSafe};

/// Percentage reported when the native layer gives no total.
pub const INDETERMINATE: i32 = -1;

/// Receiver of `(percentage, message)` progress events.
///
/// `percentage` is 0-100, or [`INDETERMINATE`]. Implementations must not
/// block.
pub trait ProgressSink: Send + Sync {
    /// Report progress.
    fn report(&self, percentage: i32, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(i32, &str) + Send + Sync,
{
    fn report(&self, percentage: i32, message: &str) {
        self(percentage, message);
    }
}

/// Convert native `(current, total)` ticks into a percentage.
#[must_use]
pub fn percentage(current: u64, total: u64) -> i32 {
    if total == 0 {
        return INDETERMINATE;
    }
    let pct = current.saturating_mul(100) / total;
    i32::try_from(pct.min(100)).unwrap_or(100)
}

/// Closure object handed to native progress callbacks.
pub struct ProgressTrampoline<'a> {
    sink: &'a dyn ProgressSink,
    message: &'a str,
}

impl<'a> ProgressTrampoline<'a> {
    /// Wrap `sink`, labelling every event with `message`.
    pub fn new(sink: &'a dyn ProgressSink, message: &'a str) -> Self {
        Self { sink, message }
    }

    /// Handle a `(current, total)` tick.
    pub fn tick(&self, current: u64, total: u64) {
        self.report_percentage(percentage(current, total));
    }

    /// Handle an already computed percentage.
    pub fn report_percentage(&self, pct: i32) {
        let sink = self.sink;
        let message = self.message;
        if panic::catch_unwind(AssertUnwindSafe(|| sink.report(pct, message))).is_err() {
            tracing::debug!(message, "Progress sink panicked; event discarded");
        }
    }
}

impl std::fmt::Debug for ProgressTrampoline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTrampoline")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}
