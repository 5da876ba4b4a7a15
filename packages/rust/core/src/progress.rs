//! Progress reporting seam.
//!
//! The engine only calls [`ProgressSink::update`]; whether that drives a
//! terminal bar, a notebook widget, or nothing is up to the implementation.

/// Receives `(current, total)` row counts while a table is being processed.
pub trait ProgressSink {
    /// `current` rows out of `total` have been fully consumed.
    fn update(&self, current: usize, total: usize);

    /// Called once when processing ends, successfully or not.
    fn finish(&self) {}
}

/// No-op progress sink for headless/test usage.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn update(&self, _current: usize, _total: usize) {}
}
