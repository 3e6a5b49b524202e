//! # linkfold-core
//!
//! Engine for discovering sets of regular files with byte-identical content
//! and consolidating them into hardlinks of a single inode.
//!
//! A run walks the given directory roots, partitions inodes into
//! content-equivalence classes through a cascade of increasingly expensive
//! tests (metadata hash, content digest, full byte comparison), then plans a
//! link schedule per device that respects the filesystem's per-inode link
//! cap.  With linking disabled the schedule only feeds the report.
//!
//! ```ignore
//! use linkfold_core::{run, Options};
//!
//! let options = Options {
//!     ignore_time: true,
//!     ..Options::default()
//! };
//! let results = run(&[std::path::PathBuf::from("/some/tree")], &options)?;
//! results.output_results();
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

pub mod compare;
pub mod digest;
pub mod error;
pub mod fsdev;
pub mod inode;
pub mod linker;
pub mod options;
pub mod path;
pub mod planner;
pub mod progress;
pub mod results;
pub mod walk;

pub use error::{Error, Result};
pub use options::Options;
pub use progress::{NoProgress, Progress};
pub use results::{Results, RunStats};

use compare::SysXattrs;
use fsdev::Linkable;
use linker::hardlink_files;
use planner::SortedLinks;
use walk::{Found, Walk};

/// Cooperative cancellation handle.  Cancelling aborts the pipeline at its
/// next I/O boundary; links already committed stay committed and the partial
/// statistics are still returned.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Walk `dirs` and consolidate duplicate files per `options`.
pub fn run(dirs: &[PathBuf], options: &Options) -> Result<Results> {
    run_with(dirs, options, &mut NoProgress, &CancelFlag::new())
}

/// [`run`] with a progress reporter and a cancellation handle.
pub fn run_with(
    dirs: &[PathBuf],
    options: &Options,
    progress: &mut dyn Progress,
    cancel: &CancelFlag,
) -> Result<Results> {
    let opts = options.validate()?;
    let walk = Walk::new(&opts)?;
    let mut results = Results::new(&opts);
    results.start();

    let xattrs = SysXattrs;
    let mut linkable = Linkable::new(&opts, &xattrs);

    for item in walk.iter(dirs) {
        if cancel.is_cancelled() {
            info!("run cancelled during walk");
            break;
        }
        match item {
            Err(e) => {
                if opts.ignore_walk_errors {
                    warn!(error = %e, "ignoring walk error");
                    continue;
                }
                return Err(e);
            }
            Ok(Found::Dir(_)) => results.found_directory(),
            Ok(Found::File(path, ds)) => {
                if ds.stat.size < opts.min_file_size {
                    results.found_file_too_small();
                } else if opts.max_file_size > 0 && ds.stat.size > opts.max_file_size {
                    results.found_file_too_large();
                } else {
                    results.found_file();
                    linkable.ingest(&path, ds, &mut results);
                }
            }
        }
        progress.show_dirs_files_found(&results.stats);
    }
    progress.clear();

    link_phase(&mut linkable, &opts, &mut results, cancel)?;

    results.end();
    Ok(results)
}

/// Plan each device's link schedule and, when linking is enabled, apply it.
fn link_phase(
    linkable: &mut Linkable<'_>,
    opts: &Options,
    results: &mut Results,
    cancel: &CancelFlag,
) -> Result<()> {
    for fsdev in linkable.fsdevs_mut() {
        let dev = fsdev.dev;
        let mut links = SortedLinks::new(fsdev);
        while let Some(planned) = links.next() {
            if cancel.is_cancelled() {
                info!("run cancelled during linking");
                return Ok(());
            }
            if opts.linking_enabled {
                match hardlink_files(&planned.src, &planned.dst, dev, opts) {
                    Ok(Some(newest)) => links.absorb_newest(planned.src.stat.ino, newest),
                    Ok(None) => {}
                    Err(e @ Error::QuiescenceViolation { .. }) => {
                        results.quiescence_violation();
                        if !opts.ignore_link_errors {
                            return Err(e);
                        }
                        warn!(error = %e, "skipping changed file");
                    }
                    Err(e) => {
                        results.link_error();
                        if !opts.ignore_link_errors {
                            return Err(e);
                        }
                        warn!(error = %e, "ignoring link error");
                    }
                }
            }
            // The schedule is accounted whether or not a failed pair was
            // skipped, keeping the counters identical to a dry run over the
            // same tree.
            results.found_new_link(&planned.src.path, &planned.dst.path);
            if let Some(size) = planned.dst_removed {
                results.found_removed_inode(size);
            }
        }
    }
    Ok(())
}
