//! Terminal progress meter for the walk phase.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use linkfold_core::{Progress, RunStats};

// A prime counter gate keeps the display lively without re-rendering on
// every file; the time gate caps the redraw rate on fast filesystems.
const COUNTER_GATE: u64 = 151;
const UPDATE_DELAY: Duration = Duration::from_millis(60);

pub struct TtyProgress {
    bar: ProgressBar,
    started: Instant,
    last_update: Instant,
    counter: u64,
}

impl TtyProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        let now = Instant::now();
        Self {
            bar,
            started: now,
            last_update: now,
            counter: 0,
        }
    }
}

impl Progress for TtyProgress {
    fn show_dirs_files_found(&mut self, stats: &RunStats) {
        self.counter += 1;
        if self.counter % COUNTER_GATE != 0 {
            return;
        }
        let now = Instant::now();
        if now.duration_since(self.last_update) < UPDATE_DELAY {
            return;
        }
        self.last_update = now;

        let elapsed = self.started.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            stats.file_count as f64 / elapsed
        } else {
            0.0
        };
        self.bar.set_message(format!(
            "{} files in {} dirs, elapsed: {:.0}s  files/sec: {:.0}",
            stats.file_count, stats.dir_count, elapsed, fps
        ));
        self.bar.tick();
    }

    fn clear(&mut self) {
        self.bar.finish_and_clear();
    }
}
