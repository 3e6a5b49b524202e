//! Run options and their normalising validation.

use serde::Serialize;

use crate::error::{Error, Result};

pub const DEFAULT_SEARCH_THRESH: i64 = 1;
pub const DEFAULT_MIN_FILE_SIZE: u64 = 1;
pub const DEFAULT_USE_NEWEST_LINK: bool = true;

/// Controls a consolidation run: which inode parameters must match for files
/// to be considered linkable, what gets walked, and whether linking actually
/// happens or the run only reports.
///
/// Callers fill in a value (usually starting from `Options::default()`) and
/// hand it to [`crate::run`]; the engine works from the canonical form
/// produced by [`Options::validate`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Only link files whose filenames match.
    pub same_name: bool,

    /// Allow linking files with differing mtimes.
    pub ignore_time: bool,

    /// Allow linking files with differing mode bits.
    pub ignore_perm: bool,

    /// Allow linking files with differing uid or gid.
    pub ignore_owner: bool,

    /// Allow linking files with differing extended attributes.
    pub ignore_xattr: bool,

    /// Equality by content alone; implies all four ignore flags.
    pub content_only: bool,

    /// Actually perform the planned link operations.  Off means dry run.
    pub linking_enabled: bool,

    /// Smallest file size eligible for linking.
    pub min_file_size: u64,

    /// Largest file size eligible for linking; 0 means unbounded.
    pub max_file_size: u64,

    /// After linking, carry the newer inode's mtime and ownership over to
    /// the surviving inode.
    pub use_newest_link: bool,

    /// Bucket length beyond which content digests kick in; -1 disables
    /// digests entirely.
    pub search_thresh: i64,

    /// Re-stat each destination before linking and skip pairs whose files
    /// changed since the walk.  Forced on whenever linking is enabled.
    pub check_quiescence: bool,

    /// Continue past errors during the walk phase.
    pub ignore_walk_errors: bool,

    /// Continue past errors during the link phase.
    pub ignore_link_errors: bool,

    /// Regexes a filename must match to be considered (OR).  When excludes
    /// are also given, a matching include overrides them.
    pub file_includes: Vec<String>,

    /// Regexes excluding filenames from consideration.
    pub file_excludes: Vec<String>,

    /// Regexes pruning directories from the walk.
    pub dir_excludes: Vec<String>,

    /// Accumulate the pre-existing hardlink group lists in the results
    /// (counters accumulate regardless).
    pub store_existing_link_results: bool,

    /// Accumulate the new-link path lists in the results.
    pub store_new_link_results: bool,

    /// Print the extended statistics section of the report.
    pub show_extended_run_stats: bool,

    /// Print the statistics report at all.
    pub show_run_stats: bool,

    /// Report verbosity; higher values force more result storing/printing.
    pub verbosity: u8,

    /// Debug statistics level for the report.
    pub debug_level: u8,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            same_name: false,
            ignore_time: false,
            ignore_perm: false,
            ignore_owner: false,
            ignore_xattr: false,
            content_only: false,
            linking_enabled: false,
            min_file_size: DEFAULT_MIN_FILE_SIZE,
            max_file_size: 0,
            use_newest_link: DEFAULT_USE_NEWEST_LINK,
            search_thresh: DEFAULT_SEARCH_THRESH,
            check_quiescence: false,
            ignore_walk_errors: false,
            ignore_link_errors: false,
            file_includes: Vec::new(),
            file_excludes: Vec::new(),
            dir_excludes: Vec::new(),
            store_existing_link_results: true,
            store_new_link_results: true,
            show_extended_run_stats: false,
            show_run_stats: true,
            verbosity: 0,
            debug_level: 0,
        }
    }
}

impl Options {
    /// Check for contradictory settings and return the canonical options
    /// value the engine runs with.  Dependent settings are switched on here
    /// rather than rejected: linking forces quiescence checking, content-only
    /// sets the individual ignore flags, verbosity forces result storing.
    pub fn validate(&self) -> Result<Options> {
        if self.max_file_size > 0 && self.max_file_size < self.min_file_size {
            return Err(Error::Validation(format!(
                "min file size ({}) cannot be larger than max file size ({})",
                self.min_file_size, self.max_file_size
            )));
        }

        let mut o = self.clone();
        if o.content_only {
            o.ignore_time = true;
            o.ignore_perm = true;
            o.ignore_owner = true;
            o.ignore_xattr = true;
        }
        if o.verbosity > 0 {
            o.show_extended_run_stats = true;
        }
        if o.verbosity > 1 {
            o.store_new_link_results = true;
        }
        if o.verbosity > 2 {
            o.store_existing_link_results = true;
        }
        if o.show_extended_run_stats {
            o.show_run_stats = true;
        }
        if o.linking_enabled {
            o.check_quiescence = true;
        }
        Ok(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = Options::default();
        assert_eq!(o.min_file_size, 1);
        assert_eq!(o.max_file_size, 0);
        assert_eq!(o.search_thresh, 1);
        assert!(o.use_newest_link);
        assert!(!o.linking_enabled);
        assert!(o.show_run_stats);
    }

    #[test]
    fn validate_rejects_inverted_size_bounds() {
        let o = Options {
            min_file_size: 100,
            max_file_size: 10,
            ..Options::default()
        };
        assert!(matches!(o.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn validate_allows_unbounded_max() {
        let o = Options {
            min_file_size: 100,
            max_file_size: 0,
            ..Options::default()
        };
        assert!(o.validate().is_ok());
    }

    #[test]
    fn content_only_sets_ignore_flags() {
        let o = Options {
            content_only: true,
            ..Options::default()
        };
        let v = o.validate().unwrap();
        assert!(v.ignore_time && v.ignore_perm && v.ignore_owner && v.ignore_xattr);
    }

    #[test]
    fn linking_forces_quiescence_check() {
        let o = Options {
            linking_enabled: true,
            ..Options::default()
        };
        assert!(o.validate().unwrap().check_quiescence);
    }

    #[test]
    fn extended_stats_imply_run_stats() {
        let o = Options {
            show_extended_run_stats: true,
            show_run_stats: false,
            ..Options::default()
        };
        assert!(o.validate().unwrap().show_run_stats);
    }
}
