//! Progress reporting seam.
//!
//! The engine calls into this trait at walk-loop granularity; terminal
//! rendering lives with the caller so the library stays display-agnostic.

use crate::results::RunStats;

pub trait Progress {
    /// Called once per walked directory or file with the running counters.
    fn show_dirs_files_found(&mut self, stats: &RunStats);

    /// Erase any progress output before the report is printed.
    fn clear(&mut self);
}

/// The no-op progress reporter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn show_dirs_files_found(&mut self, _stats: &RunStats) {}

    fn clear(&mut self) {}
}
