//! Directory walking with regex filtering.
//!
//! Directory excludes prune traversal; file includes/excludes act on
//! filenames, with a matching include overriding the excludes.  Entries are
//! visited in filename order so repeated runs over an unchanged tree ingest
//! in the same sequence.

use std::path::PathBuf;

use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, Result};
use crate::inode::{stat_from_metadata, DevStat};
use crate::options::Options;

/// One walked item of interest.
pub enum Found {
    Dir(PathBuf),
    File(PathBuf, DevStat),
}

/// Compiled walk configuration.
pub struct Walk {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
    dir_excludes: Vec<Regex>,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| Error::Pattern {
                pattern: p.clone(),
                source: e,
            })
        })
        .collect()
}

impl Walk {
    pub fn new(options: &Options) -> Result<Self> {
        Ok(Self {
            includes: compile(&options.file_includes)?,
            excludes: compile(&options.file_excludes)?,
            dir_excludes: compile(&options.dir_excludes)?,
        })
    }

    fn dir_excluded(&self, name: &str) -> bool {
        self.dir_excludes.iter().any(|r| r.is_match(name))
    }

    /// Include/exclude rules: with excludes present, a file is dropped when
    /// it matches an exclude and no include; with only includes present, a
    /// file must match one of them.
    fn file_wanted(&self, name: &str) -> bool {
        if !self.excludes.is_empty() {
            let excluded = self.excludes.iter().any(|r| r.is_match(name));
            !excluded || self.includes.iter().any(|r| r.is_match(name))
        } else if !self.includes.is_empty() {
            self.includes.iter().any(|r| r.is_match(name))
        } else {
            true
        }
    }

    fn keep_entry(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        !self.dir_excluded(&entry.file_name().to_string_lossy())
    }

    /// Walk the roots in order, yielding directories and eligible regular
    /// files.  Symlinks are never followed.
    pub fn iter<'w>(&'w self, roots: &[PathBuf]) -> impl Iterator<Item = Result<Found>> + 'w {
        roots.to_vec().into_iter().flat_map(move |root| {
            WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(move |e| self.keep_entry(e))
                .filter_map(move |entry| self.convert(entry).transpose())
        })
    }

    fn convert(&self, entry: walkdir::Result<DirEntry>) -> Result<Option<Found>> {
        let entry = entry.map_err(|e| {
            let path = e.path().map(PathBuf::from).unwrap_or_default();
            Error::Walk {
                path,
                source: e.into(),
            }
        })?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            return Ok(Some(Found::Dir(entry.into_path())));
        }
        if !file_type.is_file() {
            // Symlinks, fifos, sockets and the like are of no interest.
            return Ok(None);
        }
        if !self.file_wanted(&entry.file_name().to_string_lossy()) {
            return Ok(None);
        }
        let meta = entry.metadata().map_err(|e| Error::Walk {
            path: entry.path().to_path_buf(),
            source: e.into(),
        })?;
        let ds = DevStat {
            dev: std::os::unix::fs::MetadataExt::dev(&meta),
            stat: stat_from_metadata(&meta),
        };
        Ok(Some(Found::File(entry.into_path(), ds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn walk_files(walk: &Walk, root: &std::path::Path) -> Vec<String> {
        walk.iter(&[root.to_path_buf()])
            .filter_map(|item| match item.unwrap() {
                Found::File(path, _) => Some(
                    path.file_name().unwrap().to_string_lossy().into_owned(),
                ),
                Found::Dir(_) => None,
            })
            .collect()
    }

    #[test]
    fn walks_files_in_name_order() {
        let dir = TempDir::new().unwrap();
        for name in ["c", "a", "b"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let walk = Walk::new(&Options::default()).unwrap();
        assert_eq!(walk_files(&walk, dir.path()), vec!["a", "b", "c"]);
    }

    #[test]
    fn symlinks_are_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        let walk = Walk::new(&Options::default()).unwrap();
        assert_eq!(walk_files(&walk, dir.path()), vec!["real"]);
    }

    #[test]
    fn dir_excludes_prune_traversal() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("keep")).unwrap();
        fs::create_dir(dir.path().join("skipme")).unwrap();
        fs::write(dir.path().join("keep/f1"), b"x").unwrap();
        fs::write(dir.path().join("skipme/f2"), b"x").unwrap();

        let opts = Options {
            dir_excludes: vec!["^skip".into()],
            ..Options::default()
        };
        let walk = Walk::new(&opts).unwrap();
        assert_eq!(walk_files(&walk, dir.path()), vec!["f1"]);
    }

    #[test]
    fn file_excludes_drop_matches() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("keep.txt"), b"x").unwrap();
        fs::write(dir.path().join("drop.tmp"), b"x").unwrap();

        let opts = Options {
            file_excludes: vec![r"\.tmp$".into()],
            ..Options::default()
        };
        let walk = Walk::new(&opts).unwrap();
        assert_eq!(walk_files(&walk, dir.path()), vec!["keep.txt"]);
    }

    #[test]
    fn includes_override_excludes() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.tmp"), b"x").unwrap();
        fs::write(dir.path().join("special.tmp"), b"x").unwrap();

        let opts = Options {
            file_excludes: vec![r"\.tmp$".into()],
            file_includes: vec!["^special".into()],
            ..Options::default()
        };
        let walk = Walk::new(&opts).unwrap();
        assert_eq!(walk_files(&walk, dir.path()), vec!["special.tmp"]);
    }

    #[test]
    fn includes_alone_require_a_match() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("b.png"), b"x").unwrap();

        let opts = Options {
            file_includes: vec![r"\.jpg$".into()],
            ..Options::default()
        };
        let walk = Walk::new(&opts).unwrap();
        assert_eq!(walk_files(&walk, dir.path()), vec!["a.jpg"]);
    }

    #[test]
    fn bad_pattern_is_a_validation_error() {
        let opts = Options {
            file_excludes: vec!["[unclosed".into()],
            ..Options::default()
        };
        assert!(matches!(
            Walk::new(&opts),
            Err(Error::Pattern { .. })
        ));
    }
}
