//! Applying planned links to the filesystem.
//!
//! Each pair is applied as an atomic replace: the source is first linked at
//! a temporary name beside the destination, then renamed over it, so no
//! observer ever sees the destination path missing.  Before touching
//! anything the destination (and source) are re-stat'd against their
//! recorded snapshots; a mismatch means the tree changed under us and the
//! pair is refused.

use std::ffi::CString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::{Error, Result};
use crate::inode::lstat;
use crate::options::Options;
use crate::path::{PathInfo, PathSplit};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_link_name(dst: &PathSplit) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!(".{}.lftmp.{}.{}", dst.filename, std::process::id(), n);
    Path::new(&*dst.dirname).join(name)
}

/// Metadata carried over to the surviving inode under `use_newest_link`.
#[derive(Debug, Clone, Copy)]
pub struct NewestMetadata {
    pub sec: i64,
    pub nsec: i64,
    pub uid: u32,
    pub gid: u32,
}

/// True when the file at `pi`'s path no longer matches its recorded
/// snapshot (device, inode, size, mtime, uid, gid, mode, or nlink).
pub fn has_been_modified(pi: &PathInfo, dev: u64) -> bool {
    match lstat(&pi.path.join()) {
        Ok(ds) => ds.dev != dev || ds.stat != pi.stat,
        Err(_) => true,
    }
}

fn have_not_been_modified(src: &PathInfo, dst: &PathInfo, dev: u64) -> Result<()> {
    if has_been_modified(src, dev) {
        return Err(Error::QuiescenceViolation {
            path: src.path.join(),
        });
    }
    if has_been_modified(dst, dev) {
        return Err(Error::QuiescenceViolation {
            path: dst.path.join(),
        });
    }
    Ok(())
}

/// Replace `dst`'s directory entry with a hardlink to `src`'s inode.
///
/// Returns the metadata propagated onto the surviving inode, if any.
pub fn hardlink_files(
    src: &PathInfo,
    dst: &PathInfo,
    dev: u64,
    options: &Options,
) -> Result<Option<NewestMetadata>> {
    if options.check_quiescence {
        have_not_been_modified(src, dst, dev)?;
    }

    let src_path = src.path.join();
    let dst_path = dst.path.join();
    let tmp = temp_link_name(&dst.path);

    fs::hard_link(&src_path, &tmp).map_err(|e| Error::Link {
        src: src_path.clone(),
        dst: dst_path.clone(),
        source: e,
    })?;
    if let Err(e) = fs::rename(&tmp, &dst_path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Link {
            src: src_path,
            dst: dst_path,
            source: e,
        });
    }
    debug!(src = %src.path, dst = %dst.path, "hardlinked");

    if options.use_newest_link && dst.stat.newer_than(&src.stat) {
        // Ignored fields keep the survivor's own values; the returned record
        // always describes the inode as it ends up on disk.
        let newest = NewestMetadata {
            sec: if options.ignore_time { src.stat.sec } else { dst.stat.sec },
            nsec: if options.ignore_time { src.stat.nsec } else { dst.stat.nsec },
            uid: if options.ignore_owner { src.stat.uid } else { dst.stat.uid },
            gid: if options.ignore_owner { src.stat.gid } else { dst.stat.gid },
        };
        let unchanged = newest.sec == src.stat.sec
            && newest.nsec == src.stat.nsec
            && newest.uid == src.stat.uid
            && newest.gid == src.stat.gid;
        if unchanged {
            return Ok(None);
        }
        apply_newest_metadata(&src_path, src, newest, options).map_err(|e| Error::Link {
            src: src_path,
            dst: dst_path,
            source: e,
        })?;
        return Ok(Some(newest));
    }
    Ok(None)
}

/// Carry the (newer) destination's mtime and ownership onto the surviving
/// inode.  Fields flagged ignored are not touched; fields already matching
/// are left alone.
fn apply_newest_metadata(
    path: &Path,
    src: &PathInfo,
    newest: NewestMetadata,
    options: &Options,
) -> io::Result<()> {
    if !options.ignore_time && (newest.sec != src.stat.sec || newest.nsec != src.stat.nsec) {
        set_mtime(path, newest.sec, newest.nsec)?;
    }
    if !options.ignore_owner && (newest.uid != src.stat.uid || newest.gid != src.stat.gid) {
        set_owner(path, newest.uid, newest.gid)?;
    }
    Ok(())
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn set_mtime(path: &Path, sec: i64, nsec: i64) -> io::Result<()> {
    let cpath = c_path(path)?;
    let times = [
        // atime untouched
        libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT as _,
        },
        libc::timespec {
            tv_sec: sec as libc::time_t,
            tv_nsec: nsec as _,
        },
    ];
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_owner(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    let cpath = c_path(path)?;
    let rc = unsafe { libc::chown(cpath.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
