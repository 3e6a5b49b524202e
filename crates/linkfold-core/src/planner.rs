//! The link planner: turns linked-inode components into an ordered schedule
//! of `(src, dst)` path pairs.
//!
//! Within a component, inodes are processed from highest link count to
//! lowest, concentrating links on inodes that already survive broadly in the
//! directory tree.  The per-device `max_nlink` cap is enforced before any
//! pair of inodes is merged; inodes rejected against one source are recycled
//! and retried against a later source in the same component.
//!
//! [`SortedLinks`] is a pull iterator: each `next()` emits one pair and
//! applies its bookkeeping (nlink transfer, path move, zero-link purge) to
//! the engine state, so a consumer that stops early leaves the remaining
//! schedule unplanned.

use std::collections::VecDeque;

use crate::fsdev::FsDev;
use crate::inode::{Ino, InoSet};
use crate::path::{PathInfo, PathSplit};

/// One planned link: make `dst`'s directory entry point at `src`'s inode.
///
/// The embedded stats are the inode states at emission time, after all
/// previously emitted pairs have been accounted.
#[derive(Debug, Clone)]
pub struct PlannedLink {
    pub src: PathInfo,
    pub dst: PathInfo,
    /// Size of the destination inode when this pair drops its last link,
    /// i.e. the bytes reclaimed once the pair is applied.
    pub dst_removed: Option<u64>,
}

/// Sort a component from most-linked to least, inode number ascending as the
/// tie break, so equal inputs always plan identically.
fn sort_set_by_nlink(inos: &InoSet, fsdev: &FsDev<'_>) -> Vec<Ino> {
    let mut seq: Vec<Ino> = inos.iter().copied().collect();
    seq.sort_unstable_by_key(|ino| {
        let nlink = fsdev.stat_of(*ino).map_or(0, |s| s.nlink);
        (std::cmp::Reverse(nlink), *ino)
    });
    seq
}

struct DstState {
    ino: Ino,
    paths: VecDeque<PathSplit>,
}

/// Iterator over the planned link pairs of one device.
pub struct SortedLinks<'fs, 'a> {
    fsdev: &'fs mut FsDev<'a>,
    components: std::vec::IntoIter<InoSet>,
    /// Front is the highest-nlink inode, back the lowest.
    sorted: Vec<Ino>,
    /// Inodes set aside for another pass with a fresh source.
    remaining: Vec<Ino>,
    src: Option<Ino>,
    dst: Option<DstState>,
}

impl<'fs, 'a> SortedLinks<'fs, 'a> {
    pub fn new(fsdev: &'fs mut FsDev<'a>) -> Self {
        let components = fsdev.linked_ino_sets().into_iter();
        Self {
            fsdev,
            components,
            sorted: Vec::new(),
            remaining: Vec::new(),
            src: None,
            dst: None,
        }
    }

    /// Fold metadata applied to a surviving inode (under `use_newest_link`)
    /// back into its stored snapshot, so the quiescence checks for later
    /// pairs of the same source still agree with the filesystem.
    pub fn absorb_newest(&mut self, ino: Ino, newest: crate::linker::NewestMetadata) {
        if let Some(stat) = self.fsdev.stat_of(ino).copied() {
            let mut stat = stat;
            stat.sec = newest.sec;
            stat.nsec = newest.nsec;
            stat.uid = newest.uid;
            stat.gid = newest.gid;
            self.fsdev.set_stat(ino, stat);
        }
    }

    /// Emit the pair for `dst_path` and account for it in the engine state.
    fn emit(&mut self, src_ino: Ino, dst_ino: Ino, dst_path: PathSplit) -> Option<PlannedLink> {
        let same_name = self.fsdev.options().same_name;
        let src_path = if same_name {
            self.fsdev
                .paths_of(src_ino)?
                .arbitrary_with_filename(&dst_path.filename)?
                .clone()
        } else {
            self.fsdev.arbitrary_path(src_ino)?.clone()
        };

        let mut src_stat = *self.fsdev.stat_of(src_ino)?;
        let mut dst_stat = *self.fsdev.stat_of(dst_ino)?;

        let pair = PlannedLink {
            src: PathInfo {
                path: src_path,
                stat: src_stat,
            },
            dst: PathInfo {
                path: dst_path.clone(),
                stat: dst_stat,
            },
            dst_removed: (dst_stat.nlink == 1).then_some(dst_stat.size),
        };

        src_stat.nlink += 1;
        dst_stat.nlink -= 1;
        self.fsdev.set_stat(src_ino, src_stat);
        self.fsdev.move_linked_path(&dst_path, src_ino, dst_ino);
        if dst_stat.nlink == 0 {
            self.fsdev.purge_inode(dst_ino);
        } else {
            self.fsdev.set_stat(dst_ino, dst_stat);
        }
        Some(pair)
    }
}

impl Iterator for SortedLinks<'_, '_> {
    type Item = PlannedLink;

    fn next(&mut self) -> Option<PlannedLink> {
        loop {
            // Drain the current destination's path queue.
            if self.dst.is_some() {
                let (dst_ino, next_path) = {
                    let dst = self.dst.as_mut().expect("checked above");
                    (dst.ino, dst.paths.pop_front())
                };
                match next_path {
                    Some(dst_path) => {
                        let src_ino = self.src.expect("destination active without a source");
                        // Under same-name linking a path whose filename the
                        // source lacks stays with the destination inode.
                        if self.fsdev.options().same_name
                            && !self
                                .fsdev
                                .paths_of(src_ino)
                                .is_some_and(|p| p.has_filename(&dst_path.filename))
                        {
                            continue;
                        }
                        if let Some(pair) = self.emit(src_ino, dst_ino, dst_path) {
                            return Some(pair);
                        }
                        continue;
                    }
                    None => {
                        self.dst = None;
                        // Paths can survive under same-name linking; give the
                        // inode another chance against a later source.
                        if self
                            .fsdev
                            .paths_of(dst_ino)
                            .is_some_and(|p| !p.is_empty())
                            && self.fsdev.stat_of(dst_ino).is_some()
                        {
                            self.remaining.push(dst_ino);
                        }
                        continue;
                    }
                }
            }

            // Pick the next destination: the lowest-nlink inode left.
            if let Some(src_ino) = self.src {
                if let Some(dst_ino) = self.sorted.pop() {
                    let src_nlink = self.fsdev.stat_of(src_ino).map_or(0, |s| u64::from(s.nlink));
                    let dst_nlink = self.fsdev.stat_of(dst_ino).map_or(0, |s| u64::from(s.nlink));
                    if src_nlink + dst_nlink > self.fsdev.max_nlink {
                        // Fully linking these would blow the cap; recycle the
                        // rest of the component for a fresh source.
                        self.remaining.push(dst_ino);
                        while let Some(ino) = self.sorted.pop() {
                            self.remaining.push(ino);
                        }
                        self.src = None;
                        continue;
                    }
                    let paths = self
                        .fsdev
                        .paths_of(dst_ino)
                        .map(|p| p.all_paths())
                        .unwrap_or_default();
                    self.dst = Some(DstState {
                        ino: dst_ino,
                        paths: paths.into(),
                    });
                    continue;
                }
                self.src = None;
            }

            // Recycle leftovers, reversed, for another pass.
            while let Some(ino) = self.remaining.pop() {
                self.sorted.push(ino);
            }
            if !self.sorted.is_empty() {
                self.src = Some(self.sorted.remove(0));
                continue;
            }

            // Component exhausted; move to the next one.
            let component = self.components.next()?;
            self.sorted = sort_set_by_nlink(&component, self.fsdev);
            self.remaining.clear();
            self.src = None;
        }
    }
}
