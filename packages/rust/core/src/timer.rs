//! Nestable named-interval stopwatch.
//!
//! `tic(name)` opens a section, `toc()` closes the most recent one. In
//! additive mode every closed section adds its duration to a running total
//! per name, so repeated sections (one per batch, one per document) sum up.

use std::cell::RefCell;
use std::fmt;
use std::time::{Duration, Instant};

use textsift_shared::{Result, TextsiftError};
use tracing::{error, info, warn};

/// What `toc` does with a measured duration besides accumulating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutput {
    /// Log every closed section at `info` level.
    Report,
    /// Stay silent; read results from [`Tictoc::summary`].
    Quiet,
}

#[derive(Debug, Default)]
struct TimerState {
    stack: Vec<(String, Instant)>,
    /// Per-name totals in first-seen order. Only filled in additive mode.
    totals: Vec<(String, Duration)>,
}

impl TimerState {
    fn total_mut(&mut self, name: &str) -> &mut Duration {
        let idx = match self.totals.iter().position(|(n, _)| n == name) {
            Some(i) => i,
            None => {
                self.totals.push((name.to_string(), Duration::ZERO));
                self.totals.len() - 1
            }
        };
        &mut self.totals[idx].1
    }
}

/// Stack-based section timer.
///
/// Uses interior mutability so that a section can be opened while a
/// [`Timed`] iterator borrowed from the same timer is alive. Not `Sync`.
#[derive(Debug)]
pub struct Tictoc {
    output: TimerOutput,
    additive: bool,
    state: RefCell<TimerState>,
}

impl Tictoc {
    pub fn new(output: TimerOutput, additive: bool) -> Self {
        Self {
            output,
            additive,
            state: RefCell::new(TimerState::default()),
        }
    }

    /// Open a section named `name`.
    pub fn tic(&self, name: impl Into<String>) {
        let name = name.into();
        let mut state = self.state.borrow_mut();
        if self.additive {
            state.total_mut(&name);
        }
        state.stack.push((name, Instant::now()));
    }

    /// Close the most recently opened section and return its duration.
    ///
    /// Fails with a state violation when no section is open.
    pub fn toc(&self) -> Result<Duration> {
        let stop = Instant::now();
        let mut state = self.state.borrow_mut();
        let (name, start) = state
            .stack
            .pop()
            .ok_or_else(|| TextsiftError::state("toc() called with no open tic()"))?;
        let elapsed = stop.duration_since(start);
        if self.output == TimerOutput::Report {
            info!(section = %name, elapsed = %format_duration(elapsed), "timer");
        }
        if self.additive {
            *state.total_mut(&name) += elapsed;
        }
        Ok(elapsed)
    }

    /// Drop all open sections without recording them.
    pub fn clear(&self) {
        self.state.borrow_mut().stack.clear();
    }

    /// Number of currently open sections.
    pub fn depth(&self) -> usize {
        self.state.borrow().stack.len()
    }

    /// Accumulated total for `name` (additive mode only).
    pub fn total(&self, name: &str) -> Option<Duration> {
        self.state
            .borrow()
            .totals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
    }

    /// Time how long `iter` takes to produce each element under `name`.
    ///
    /// Only the time spent inside the wrapped iterator's `next` is
    /// measured; whatever the caller does between pulls is excluded.
    pub fn wrap<I>(&self, iter: I, name: impl Into<String>) -> Timed<'_, I::IntoIter>
    where
        I: IntoIterator,
    {
        Timed {
            timer: self,
            inner: iter.into_iter(),
            name: name.into(),
        }
    }

    /// Report all accumulated totals. Open sections are listed and logged as
    /// a warning, since they mean a `tic` was never matched.
    pub fn summary(&self) -> TimerSummary {
        let state = self.state.borrow();
        let open_sections: Vec<String> = state.stack.iter().map(|(n, _)| n.clone()).collect();
        if !open_sections.is_empty() {
            warn!(
                open = open_sections.len(),
                sections = ?open_sections,
                "timer stack is not empty: unmatched tic()"
            );
        }
        TimerSummary {
            totals: state.totals.clone(),
            open_sections,
        }
    }
}

impl Default for Tictoc {
    fn default() -> Self {
        Self::new(TimerOutput::Quiet, true)
    }
}

/// Iterator adapter returned by [`Tictoc::wrap`].
pub struct Timed<'a, I> {
    timer: &'a Tictoc,
    inner: I,
    name: String,
}

impl<I: Iterator> Iterator for Timed<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        self.timer.tic(self.name.as_str());
        let item = self.inner.next();
        if let Err(e) = self.timer.toc() {
            error!(section = %self.name, error = %e, "wrapped iterator unbalanced the timer");
        }
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Snapshot of a timer's totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerSummary {
    pub totals: Vec<(String, Duration)>,
    /// Sections that were opened but never closed.
    pub open_sections: Vec<String>,
}

impl TimerSummary {
    pub fn is_balanced(&self) -> bool {
        self.open_sections.is_empty()
    }
}

impl fmt::Display for TimerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.open_sections.is_empty() {
            writeln!(
                f,
                "Warning: stack is not empty but has {} items",
                self.open_sections.len()
            )?;
        }
        for (name, total) in &self.totals {
            writeln!(f, "{name}: {}", format_duration(*total))?;
        }
        Ok(())
    }
}

/// Human-friendly duration: `1:02:03`, `2:05`, `12s`, `3.4s`, `25ms`, `1.5ms`, `830.0us`.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos() as f64;
    if nanos > 10e9 {
        let secs = d.as_secs();
        if secs > 3600 {
            format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        } else if secs > 60 {
            format!("{}:{:02}", secs / 60, secs % 60)
        } else {
            format!("{secs}s")
        }
    } else if nanos > 1e9 {
        format!("{:.1}s", nanos / 1e9)
    } else if nanos > 10e6 {
        format!("{}ms", (nanos / 1e6) as u64)
    } else if nanos > 1e6 {
        format!("{:.1}ms", nanos / 1e6)
    } else {
        format!("{:.1}us", nanos / 1e3)
    }
}
