//! Inode metadata snapshots and the metadata bucket hash.

use std::collections::HashSet;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::options::Options;

/// Inode number; unique within one device.
pub type Ino = u64;

/// Set of inode numbers.
pub type InoSet = HashSet<Ino>;

/// The stat fields the engine cares about, frozen at walk time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    pub ino: Ino,
    pub size: u64,
    pub sec: i64,
    pub nsec: i64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl StatInfo {
    pub fn equal_time(&self, other: &StatInfo) -> bool {
        self.sec == other.sec && self.nsec == other.nsec
    }

    pub fn equal_mode(&self, other: &StatInfo) -> bool {
        self.mode == other.mode
    }

    pub fn equal_ownership(&self, other: &StatInfo) -> bool {
        self.uid == other.uid && self.gid == other.gid
    }

    /// Permission bits only (no file type).
    pub fn perm_bits(&self) -> u32 {
        self.mode & 0o777
    }

    pub fn newer_than(&self, other: &StatInfo) -> bool {
        (self.sec, self.nsec) > (other.sec, other.nsec)
    }

    fn mtime_nanos(&self) -> u64 {
        self.sec
            .wrapping_mul(1_000_000_000)
            .wrapping_add(self.nsec) as u64
    }
}

/// A [`StatInfo`] plus the device it came from.  The device number selects
/// the per-device engine and is dropped once the snapshot is filed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevStat {
    pub dev: u64,
    pub stat: StatInfo,
}

/// Snapshot a path without following symlinks.
pub fn lstat(path: &Path) -> io::Result<DevStat> {
    let meta = std::fs::symlink_metadata(path)?;
    Ok(DevStat {
        dev: meta.dev(),
        stat: stat_from_metadata(&meta),
    })
}

/// Extract the engine's stat fields from an already-obtained `Metadata`.
pub fn stat_from_metadata(meta: &std::fs::Metadata) -> StatInfo {
    StatInfo {
        ino: meta.ino(),
        size: meta.size(),
        sec: meta.mtime(),
        nsec: meta.mtime_nsec(),
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        mode: meta.mode(),
    }
}

/// Metadata bucket key.  Collision-tolerant: a collision only means two
/// inodes end up in the same candidate pool and get compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetaHash(u64);

/// Produce an equal hash for potentially equal files, based only on inode
/// metadata.  The requirement is one-sided: files that could be linked must
/// hash equal; unequal files hashing equal merely costs a comparison later.
pub fn hash_ino(stat: &StatInfo, options: &Options) -> MetaHash {
    let mut h = stat.size;
    if !options.ignore_time {
        h ^= stat.mtime_nanos();
    }
    if !options.ignore_perm {
        h ^= u64::from(stat.perm_bits());
    }
    if !options.ignore_owner {
        h ^= u64::from(stat.uid) << 32 | u64::from(stat.gid);
    }
    MetaHash(h)
}
