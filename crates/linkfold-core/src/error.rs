//! Error kinds surfaced by a consolidation run.
//!
//! Transient I/O failures inside the engine (digest reads, comparison reads)
//! never surface here; they are absorbed where they occur and the run
//! continues.  What does surface is classified so callers can honour the
//! ignore-walk-errors / ignore-link-errors policies.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Contradictory options; fatal before any work begins.
    #[error("invalid options: {0}")]
    Validation(String),

    /// A regex in the include/exclude option lists failed to compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Failure during the directory walk (unreadable directory, stat
    /// failure).  Skippable via `ignore_walk_errors`.
    #[error("walk failed at {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failure while applying a planned link.  Skippable via
    /// `ignore_link_errors`.
    #[error("linking {} over {} failed: {source}", src.display(), dst.display())]
    Link {
        src: PathBuf,
        dst: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A file changed between walk time and link time.
    #[error("{} changed since it was walked", path.display())]
    QuiescenceViolation { path: PathBuf },

    #[error(transparent)]
    Io(#[from] io::Error),
}
