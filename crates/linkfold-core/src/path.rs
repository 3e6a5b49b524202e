//! Pathname handling with interned directory names.
//!
//! A walked tree typically holds many files per directory, so the dirname
//! half of every pathname is stored once behind an `Arc<str>` and shared by
//! all files inside it.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::inode::StatInfo;

/// A pathname split into its directory and filename halves.
///
/// Dirnames are interned through [`PathPool`]; cloning a `PathSplit` never
/// copies path bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSplit {
    pub dirname: Arc<str>,
    pub filename: Arc<str>,
}

impl PathSplit {
    /// Rejoin the halves into a full pathname.
    pub fn join(&self) -> PathBuf {
        Path::new(&*self.dirname).join(&*self.filename)
    }
}

impl fmt::Display for PathSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.join().display())
    }
}

/// A pathname plus the stat snapshot taken when it was walked.
#[derive(Debug, Clone, PartialEq)]
pub struct PathInfo {
    pub path: PathSplit,
    pub stat: StatInfo,
}

/// Interning pool for directory names.
#[derive(Debug, Default)]
pub struct PathPool {
    dirnames: HashSet<Arc<str>>,
}

impl PathPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `path` into an interned dirname plus filename.
    ///
    /// A path with no parent component gets `"."` as its dirname, so that
    /// `join()` round-trips to a usable relative pathname.
    pub fn split(&mut self, path: &Path) -> PathSplit {
        let dirname = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy(),
            _ => ".".into(),
        };
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy())
            .unwrap_or_default();
        PathSplit {
            dirname: self.intern(&dirname),
            filename: Arc::from(filename.as_ref()),
        }
    }

    fn intern(&mut self, s: &str) -> Arc<str> {
        if let Some(found) = self.dirnames.get(s) {
            return Arc::clone(found);
        }
        let arc: Arc<str> = Arc::from(s);
        self.dirnames.insert(Arc::clone(&arc));
        arc
    }

    #[cfg(test)]
    fn interned_count(&self) -> usize {
        self.dirnames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_roundtrip() {
        let mut pool = PathPool::new();
        let ps = pool.split(Path::new("/some/dir/file.txt"));
        assert_eq!(&*ps.dirname, "/some/dir");
        assert_eq!(&*ps.filename, "file.txt");
        assert_eq!(ps.join(), PathBuf::from("/some/dir/file.txt"));
    }

    #[test]
    fn bare_filename_gets_dot_dirname() {
        let mut pool = PathPool::new();
        let ps = pool.split(Path::new("file.txt"));
        assert_eq!(&*ps.dirname, ".");
        assert_eq!(ps.join(), PathBuf::from("./file.txt"));
    }

    #[test]
    fn dirnames_are_shared() {
        let mut pool = PathPool::new();
        let a = pool.split(Path::new("/d/a"));
        let b = pool.split(Path::new("/d/b"));
        assert!(Arc::ptr_eq(&a.dirname, &b.dirname));
        assert_eq!(pool.interned_count(), 1);

        let c = pool.split(Path::new("/other/c"));
        assert!(!Arc::ptr_eq(&a.dirname, &c.dirname));
        assert_eq!(pool.interned_count(), 2);
    }
}
