//! The per-device inode consolidation engine.
//!
//! Each filesystem device gets one [`FsDev`].  Ingestion partitions inodes
//! into metadata-hash buckets, escalates long bucket searches to content
//! digests, proves content equality through the comparison oracle, and
//! records proven pairs as edges in the linked-inode adjacency.  The link
//! planner in [`crate::planner`] later turns the adjacency components into a
//! link schedule.
//!
//! The adjacency is an undirected graph that may contain cycles, so it is
//! stored purely as inode indices and traversed with explicit worklists;
//! there are no ownership chains between inode records.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::compare::{file_contents_equal, XattrComparator};
use crate::digest::{content_digest, Digest};
use crate::inode::{hash_ino, lstat, DevStat, Ino, InoSet, MetaHash, StatInfo};
use crate::options::Options;
use crate::path::{PathInfo, PathPool, PathSplit};
use crate::results::Results;

/// Paths of one inode, grouped by filename.
///
/// A `BTreeMap` keeps "give me any path" answers stable across runs, which
/// in turn keeps the planner's output reproducible.
#[derive(Debug, Default, Clone)]
pub struct FilenamePaths {
    map: BTreeMap<Arc<str>, Vec<PathSplit>>,
}

impl FilenamePaths {
    pub fn append(&mut self, path: PathSplit) {
        self.map
            .entry(Arc::clone(&path.filename))
            .or_default()
            .push(path);
    }

    pub fn remove(&mut self, path: &PathSplit) {
        if let Some(paths) = self.map.get_mut(&path.filename) {
            paths.retain(|p| p != path);
            if paths.is_empty() {
                self.map.remove(&path.filename);
            }
        }
    }

    /// Any recorded path; the lexicographically first filename's first entry.
    pub fn arbitrary(&self) -> Option<&PathSplit> {
        self.map.values().next().and_then(|v| v.first())
    }

    pub fn arbitrary_with_filename(&self, filename: &str) -> Option<&PathSplit> {
        self.map.get(filename).and_then(|v| v.first())
    }

    pub fn has_filename(&self, filename: &str) -> bool {
        self.map.contains_key(filename)
    }

    /// Snapshot of all recorded paths, in stable order.
    pub fn all_paths(&self) -> Vec<PathSplit> {
        self.map.values().flatten().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }
}

/// Per-device engine state.
pub struct FsDev<'a> {
    pub dev: u64,
    pub max_nlink: u64,
    options: &'a Options,
    xattrs: &'a dyn XattrComparator,
    path_pool: PathPool,
    ino_hashes: HashMap<MetaHash, InoSet>,
    ino_stat: HashMap<Ino, StatInfo>,
    ino_paths: HashMap<Ino, FilenamePaths>,
    linked_inos: HashMap<Ino, InoSet>,
    digest_ino: HashMap<Digest, InoSet>,
    inos_with_digest: InoSet,
}

impl<'a> FsDev<'a> {
    pub fn new(
        dev: u64,
        max_nlink: u64,
        options: &'a Options,
        xattrs: &'a dyn XattrComparator,
    ) -> Self {
        Self {
            dev,
            max_nlink,
            options,
            xattrs,
            path_pool: PathPool::new(),
            ino_hashes: HashMap::new(),
            ino_stat: HashMap::new(),
            ino_paths: HashMap::new(),
            linked_inos: HashMap::new(),
            digest_ino: HashMap::new(),
            inos_with_digest: InoSet::new(),
        }
    }

    pub fn options(&self) -> &Options {
        self.options
    }

    /// Consume one walked file.  `pathname` must live on this device and
    /// `stat` must be its current snapshot.
    pub fn ingest(&mut self, pathname: &Path, stat: StatInfo, results: &mut Results) {
        let cur_path = self.path_pool.split(pathname);

        if !self.ino_stat.contains_key(&stat.ino) {
            results.found_inode(stat.nlink);
        }

        let hash = hash_ino(&stat, self.options);
        if !self.ino_hashes.contains_key(&hash) {
            results.missed_hash();
            self.ino_hashes.insert(hash, InoSet::from([stat.ino]));
        } else {
            results.found_hash();
            if self.ino_stat.contains_key(&stat.ino) {
                // Another directory entry for an inode we already know: a
                // pre-existing hardlink, no peer search needed.
                let prev = self
                    .arbitrary_path(stat.ino)
                    .expect("known inode has no recorded path")
                    .clone();
                let size = self.ino_stat[&stat.ino].size;
                results.found_existing_link(&prev, &cur_path, size);
            } else {
                self.search_for_peer(&cur_path, &stat, hash, results);
            }
            self.ino_hashes
                .get_mut(&hash)
                .expect("bucket vanished during ingest")
                .insert(stat.ino);
        }

        // Always refresh to the latest snapshot before returning.
        self.ino_stat.insert(stat.ino, stat);
        self.ino_paths.entry(stat.ino).or_default().append(cur_path);

        #[cfg(debug_assertions)]
        self.check_invariants();
    }

    /// Hunt the hash bucket for an inode with identical content.  On a match
    /// the pair is recorded in the linked adjacency.
    fn search_for_peer(
        &mut self,
        cur_path: &PathSplit,
        stat: &StatInfo,
        hash: MetaHash,
        results: &mut Results,
    ) {
        let bucket_len = self.ino_hashes[&hash].len();
        let component = self.linked_ino_set(stat.ino);
        let mut candidates: Vec<Ino> = self.ino_hashes[&hash]
            .iter()
            .filter(|i| !component.contains(*i))
            .copied()
            .collect();
        candidates.sort_unstable();
        if candidates.is_empty() {
            results.no_hash_match();
            return;
        }

        results.searched_ino_seq();

        // Long bucket chains switch on digests: candidates whose digest is
        // known to differ are dropped, candidates with a matching digest are
        // searched before undigested ones.
        let mut use_digest = false;
        if self.options.search_thresh >= 0 && bucket_len as i64 > self.options.search_thresh {
            match content_digest(&cur_path.join()) {
                Ok(digest) => {
                    results.computed_digest();
                    use_digest = true;
                    self.register_digest(stat.ino, digest);
                    let same_digest: Vec<Ino> = candidates
                        .iter()
                        .filter(|i| {
                            self.digest_ino
                                .get(&digest)
                                .is_some_and(|set| set.contains(*i))
                        })
                        .copied()
                        .collect();
                    let no_digest: Vec<Ino> = candidates
                        .iter()
                        .filter(|i| !self.inos_with_digest.contains(*i))
                        .copied()
                        .collect();
                    debug_assert!(!no_digest.contains(&stat.ino));
                    debug_assert!(same_digest.iter().all(|i| !no_digest.contains(i)));
                    candidates = same_digest;
                    candidates.extend(no_digest);
                }
                Err(e) => {
                    debug!(
                        path = %cur_path,
                        error = %e,
                        "digest read failed, falling back to linear search"
                    );
                }
            }
        }

        let cur_info = PathInfo {
            path: cur_path.clone(),
            stat: *stat,
        };
        for candidate in candidates {
            results.inc_ino_seq_iterations();
            let candidate_info = match self.path_info(candidate) {
                Some(info) => info,
                None => continue,
            };
            if self.are_files_hardlinkable(&candidate_info, &cur_info, use_digest, results) {
                self.add_linkable_inos(candidate, stat.ino);
                return;
            }
        }
        results.no_hash_match();
    }

    /// The hardlinkability predicate: may these two distinct inodes be
    /// merged?  Cheap metadata tests run first; content equality is the
    /// final, expensive word.
    fn are_files_hardlinkable(
        &mut self,
        ps1: &PathInfo,
        ps2: &PathInfo,
        use_digest: bool,
        results: &mut Results,
    ) -> bool {
        if ps1.stat.ino == ps2.stat.ino || ps1.stat.size != ps2.stat.size {
            return false;
        }
        let o = self.options;
        if !o.content_only {
            if !o.ignore_time && !ps1.stat.equal_time(&ps2.stat) {
                return false;
            }
            if !o.ignore_perm && !ps1.stat.equal_mode(&ps2.stat) {
                return false;
            }
            if !o.ignore_owner && !ps1.stat.equal_ownership(&ps2.stat) {
                return false;
            }
            if !o.ignore_xattr {
                match self.xattrs.equal_xattrs(&ps1.path.join(), &ps2.path.join()) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => return false,
                }
            }
        }

        results.did_comparison();
        let outcome = match file_contents_equal(&ps1.path.join(), &ps2.path.join()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(a = %ps1.path, b = %ps2.path, error = %e, "content comparison failed");
                results.compare_error();
                return false;
            }
        };
        results.add_bytes_compared(outcome.bytes_compared);
        if !outcome.equal {
            return false;
        }
        results.found_equal_files();

        // Cache digests for both sides of a proven-equal pair so future
        // searches of this bucket can prune against them.
        if use_digest {
            self.new_path_stat_digest(ps1, results);
            self.new_path_stat_digest(ps2, results);
        }

        let size = ps1.stat.size;
        let mut mismatch = false;
        if !ps1.stat.equal_time(&ps2.stat) {
            results.add_mismatched_mtime_bytes(size);
            mismatch = true;
        }
        if ps1.stat.perm_bits() != ps2.stat.perm_bits() {
            results.add_mismatched_mode_bytes(size);
            mismatch = true;
        }
        if ps1.stat.uid != ps2.stat.uid {
            results.add_mismatched_uid_bytes(size);
            mismatch = true;
        }
        if ps1.stat.gid != ps2.stat.gid {
            results.add_mismatched_gid_bytes(size);
            mismatch = true;
        }
        if o.content_only || o.ignore_xattr {
            // Only worth re-reading attributes when the predicate skipped
            // them; otherwise equality was already required above.
            if let Ok(false) = self.xattrs.equal_xattrs(&ps1.path.join(), &ps2.path.join()) {
                results.add_mismatched_xattr_bytes(size);
                mismatch = true;
            }
        }
        if mismatch {
            results.add_mismatched_total_bytes(size);
        }
        true
    }

    fn register_digest(&mut self, ino: Ino, digest: Digest) {
        self.digest_ino.entry(digest).or_default().insert(ino);
        self.inos_with_digest.insert(ino);
    }

    /// Compute and cache the digest for a path whose inode has none yet.
    fn new_path_stat_digest(&mut self, ps: &PathInfo, results: &mut Results) {
        if self.inos_with_digest.contains(&ps.stat.ino) {
            return;
        }
        match content_digest(&ps.path.join()) {
            Ok(digest) => {
                results.computed_digest();
                self.register_digest(ps.stat.ino, digest);
            }
            Err(e) => debug!(path = %ps.path, error = %e, "digest read failed"),
        }
    }

    fn add_linkable_inos(&mut self, ino1: Ino, ino2: Ino) {
        self.linked_inos.entry(ino1).or_default().insert(ino2);
        self.linked_inos.entry(ino2).or_default().insert(ino1);
    }

    /// Connected component of `ino` in the linked adjacency; `{ino}` when it
    /// has no edges.  Worklist traversal over a drained copy, so each edge is
    /// consumed once.
    pub fn linked_ino_set(&self, ino: Ino) -> InoSet {
        if !self.linked_inos.contains_key(&ino) {
            return InoSet::from([ino]);
        }
        let mut remaining = self.linked_inos.clone();
        let mut result = InoSet::new();
        let mut pending = vec![ino];
        while let Some(i) = pending.pop() {
            result.insert(i);
            if let Some(adjacent) = remaining.remove(&i) {
                pending.extend(adjacent);
            }
        }
        result
    }

    /// Every connected component exactly once, ordered by each component's
    /// smallest inode so the sequence is reproducible.
    pub fn linked_ino_sets(&self) -> Vec<InoSet> {
        let mut remaining = self.linked_inos.clone();
        let mut starts: Vec<Ino> = self.linked_inos.keys().copied().collect();
        starts.sort_unstable();

        let mut components = Vec::new();
        for start in starts {
            if !remaining.contains_key(&start) {
                continue;
            }
            let mut result = InoSet::new();
            let mut pending = vec![start];
            while let Some(i) = pending.pop() {
                result.insert(i);
                if let Some(adjacent) = remaining.remove(&i) {
                    pending.extend(adjacent);
                }
            }
            components.push(result);
        }
        components
    }

    pub fn stat_of(&self, ino: Ino) -> Option<&StatInfo> {
        self.ino_stat.get(&ino)
    }

    pub(crate) fn set_stat(&mut self, ino: Ino, stat: StatInfo) {
        self.ino_stat.insert(ino, stat);
    }

    pub fn paths_of(&self, ino: Ino) -> Option<&FilenamePaths> {
        self.ino_paths.get(&ino)
    }

    pub fn arbitrary_path(&self, ino: Ino) -> Option<&PathSplit> {
        self.ino_paths.get(&ino).and_then(FilenamePaths::arbitrary)
    }

    pub fn path_info(&self, ino: Ino) -> Option<PathInfo> {
        let path = self.arbitrary_path(ino)?.clone();
        let stat = *self.ino_stat.get(&ino)?;
        Some(PathInfo { path, stat })
    }

    /// Move one path record from `dst_ino` to `src_ino` after the link
    /// schedule transferred the directory entry.
    pub(crate) fn move_linked_path(&mut self, dst_path: &PathSplit, src_ino: Ino, dst_ino: Ino) {
        if let Some(paths) = self.ino_paths.get_mut(&dst_ino) {
            paths.remove(dst_path);
        }
        self.ino_paths
            .entry(src_ino)
            .or_default()
            .append(dst_path.clone());
    }

    /// Drop an inode that reached zero links from every index.
    pub(crate) fn purge_inode(&mut self, ino: Ino) {
        if let Some(stat) = self.ino_stat.remove(&ino) {
            let hash = hash_ino(&stat, self.options);
            if let Some(bucket) = self.ino_hashes.get_mut(&hash) {
                bucket.remove(&ino);
                if bucket.is_empty() {
                    self.ino_hashes.remove(&hash);
                }
            }
        }
        self.ino_paths.remove(&ino);
        if let Some(adjacent) = self.linked_inos.remove(&ino) {
            for other in adjacent {
                let now_isolated = match self.linked_inos.get_mut(&other) {
                    Some(set) => {
                        set.remove(&ino);
                        set.is_empty()
                    }
                    None => false,
                };
                if now_isolated {
                    self.linked_inos.remove(&other);
                }
            }
        }
        if self.inos_with_digest.remove(&ino) {
            self.digest_ino.retain(|_, set| {
                set.remove(&ino);
                !set.is_empty()
            });
        }
    }

    /// Index consistency checks; a violation here is a programmer error.
    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        let bucket_inos: InoSet = self.ino_hashes.values().flatten().copied().collect();
        for ino in &bucket_inos {
            assert!(self.ino_stat.contains_key(ino), "bucketed ino lacks stat");
            assert!(
                self.ino_paths.get(ino).is_some_and(|p| !p.is_empty()),
                "bucketed ino lacks paths"
            );
        }
        for ino in self.ino_stat.keys() {
            assert!(bucket_inos.contains(ino), "stat'd ino missing from buckets");
        }
        for (a, set) in &self.linked_inos {
            assert!(self.ino_stat.contains_key(a), "linked ino lacks stat");
            for b in set {
                assert!(
                    self.linked_inos.get(b).is_some_and(|s| s.contains(a)),
                    "linked adjacency not symmetric"
                );
                let (sa, sb) = (&self.ino_stat[a], &self.ino_stat[b]);
                assert_eq!(
                    hash_ino(sa, self.options),
                    hash_ino(sb, self.options),
                    "linked inos disagree on metadata hash"
                );
            }
        }
        let mut digest_union = InoSet::new();
        let mut digest_total = 0usize;
        for set in self.digest_ino.values() {
            digest_total += set.len();
            digest_union.extend(set.iter().copied());
        }
        assert_eq!(digest_total, digest_union.len(), "digest sets overlap");
        assert_eq!(
            digest_union, self.inos_with_digest,
            "digest index out of sync"
        );
    }
}

/// Dispatches walked files to the per-device engines.
pub struct Linkable<'a> {
    options: &'a Options,
    xattrs: &'a dyn XattrComparator,
    fsdevs: BTreeMap<u64, FsDev<'a>>,
}

impl<'a> Linkable<'a> {
    pub fn new(options: &'a Options, xattrs: &'a dyn XattrComparator) -> Self {
        Self {
            options,
            xattrs,
            fsdevs: BTreeMap::new(),
        }
    }

    pub fn ingest(&mut self, pathname: &Path, ds: DevStat, results: &mut Results) {
        let options = self.options;
        let xattrs = self.xattrs;
        let fsdev = self.fsdevs.entry(ds.dev).or_insert_with(|| {
            FsDev::new(ds.dev, device_max_nlink(pathname), options, xattrs)
        });
        fsdev.ingest(pathname, ds.stat, results);
    }

    /// Engines in device order.
    pub fn fsdevs_mut(&mut self) -> impl Iterator<Item = &mut FsDev<'a>> {
        self.fsdevs.values_mut()
    }

    pub fn fsdev(&self, dev: u64) -> Option<&FsDev<'a>> {
        self.fsdevs.get(&dev)
    }
}

/// The filesystem's reported per-inode link cap, or effectively unlimited
/// when the filesystem does not report one.
fn device_max_nlink(path: &Path) -> u64 {
    let dir = path.parent().unwrap_or(path);
    match nix::unistd::pathconf(dir, nix::unistd::PathconfVar::LINK_MAX) {
        Ok(Some(n)) if n > 0 => n as u64,
        _ => u64::MAX,
    }
}

/// Ingest a single pathname, stat'ing it and routing to its device engine.
pub fn find_identical_files(
    linkable: &mut Linkable<'_>,
    pathname: &Path,
    results: &mut Results,
) -> std::io::Result<()> {
    let ds = lstat(pathname)?;
    linkable.ingest(pathname, ds, results);
    Ok(())
}
