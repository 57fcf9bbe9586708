//! Update cycle reporting.
//!
//! Every resolved update cycle produces an [`UpdateReport`] describing
//! what ran: the keys in execution order, whether the cycle replotted or
//! cleared, and how long it took. The report backs the engine's debug
//! logging and lets callers assert on cycle contents without reaching
//! into plotter internals.

/// Report from one resolved update cycle.
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    /// Keys that ran, in execution order.
    pub keys: Vec<String>,

    /// True if this cycle was a first initialization or a reinit.
    pub initializing: bool,

    /// True if the data selection was recomputed.
    pub replot: bool,

    /// True if the axes were cleared and every formatoption re-applied.
    pub cleared: bool,

    /// Keys skipped because they are controlled by another plotter.
    pub skipped_shared: Vec<String>,

    /// Wall time of the resolve + execute span in milliseconds.
    pub duration_ms: u64,
}

impl UpdateReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of formatoptions that ran.
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Concise one-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} formatoptions in {}ms, replot={}, cleared={}",
            self.count(),
            self.duration_ms,
            self.replot,
            self.cleared,
        )
    }

    /// One-line log entry.
    ///
    /// Format: `[update/full]    3ms  4 formatoptions  replot=0  cleared=0  skipped=0`
    pub fn log_line(&self) -> String {
        format!(
            "[update/{}] {:>4}ms  {} formatoptions  replot={}  cleared={}  skipped={}",
            if self.initializing { "init" } else { "full" },
            self.duration_ms,
            self.count(),
            if self.replot { 1 } else { 0 },
            if self.cleared { 1 } else { 0 },
            self.skipped_shared.len(),
        )
    }
}
