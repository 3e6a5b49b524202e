//! The equality oracle: byte-for-byte file comparison plus the extended
//! attribute comparator seam.
//!
//! Xattr retrieval is platform-specific and kept behind [`XattrComparator`]
//! so the engine can be exercised without touching real attributes.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const CMP_BUF_SIZE: usize = 64 * 1024;

/// Result of a streaming byte comparison.
#[derive(Debug, Clone, Copy)]
pub struct CompareOutcome {
    pub equal: bool,
    /// Bytes of the first file examined before a verdict was reached.
    pub bytes_compared: u64,
}

fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Stream both files and report whether their contents are byte-identical.
pub fn file_contents_equal(p1: &Path, p2: &Path) -> io::Result<CompareOutcome> {
    let mut f1 = File::open(p1)?;
    let mut f2 = File::open(p2)?;
    let mut b1 = vec![0u8; CMP_BUF_SIZE];
    let mut b2 = vec![0u8; CMP_BUF_SIZE];
    let mut bytes_compared = 0u64;

    loop {
        let n1 = read_full(&mut f1, &mut b1)?;
        let n2 = read_full(&mut f2, &mut b2)?;
        bytes_compared += n1 as u64;
        if n1 != n2 || b1[..n1] != b2[..n2] {
            return Ok(CompareOutcome {
                equal: false,
                bytes_compared,
            });
        }
        if n1 == 0 {
            return Ok(CompareOutcome {
                equal: true,
                bytes_compared,
            });
        }
    }
}

/// Abstract comparator for extended attributes.
pub trait XattrComparator {
    /// True iff both paths carry identical xattr name/value sets.
    fn equal_xattrs(&self, a: &Path, b: &Path) -> io::Result<bool>;
}

/// Comparator backed by the platform xattr syscalls.
///
/// On filesystems without xattr support the attribute set is treated as
/// empty, so such files always compare equal here.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysXattrs;

impl XattrComparator for SysXattrs {
    fn equal_xattrs(&self, a: &Path, b: &Path) -> io::Result<bool> {
        Ok(xattrs_of(a)? == xattrs_of(b)?)
    }
}

#[cfg(target_os = "linux")]
fn xattrs_of(path: &Path) -> io::Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let not_supported = |e: &io::Error| e.raw_os_error() == Some(libc::ENOTSUP);

    let names = match xattr_name_list(&cpath) {
        Ok(names) => names,
        Err(e) if not_supported(&e) => return Ok(BTreeMap::new()),
        Err(e) => return Err(e),
    };

    let mut map = BTreeMap::new();
    for name in names.split(|b| *b == 0).filter(|s| !s.is_empty()) {
        let cname = CString::new(name)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        map.insert(name.to_vec(), xattr_value(&cpath, &cname)?);
    }
    Ok(map)
}

#[cfg(target_os = "linux")]
fn xattr_name_list(cpath: &std::ffi::CStr) -> io::Result<Vec<u8>> {
    // Size query first, then the fetch; a list that grows in between shows
    // up as ERANGE and is surfaced to the caller.
    let len = unsafe { libc::llistxattr(cpath.as_ptr(), std::ptr::null_mut(), 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    let mut names = vec![0u8; len as usize];
    if names.is_empty() {
        return Ok(names);
    }
    let len = unsafe {
        libc::llistxattr(
            cpath.as_ptr(),
            names.as_mut_ptr() as *mut libc::c_char,
            names.len(),
        )
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    names.truncate(len as usize);
    Ok(names)
}

#[cfg(target_os = "linux")]
fn xattr_value(cpath: &std::ffi::CStr, cname: &std::ffi::CStr) -> io::Result<Vec<u8>> {
    let len = unsafe { libc::lgetxattr(cpath.as_ptr(), cname.as_ptr(), std::ptr::null_mut(), 0) };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    let mut value = vec![0u8; len as usize];
    if value.is_empty() {
        return Ok(value);
    }
    let len = unsafe {
        libc::lgetxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            value.as_mut_ptr() as *mut libc::c_void,
            value.len(),
        )
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    value.truncate(len as usize);
    Ok(value)
}

#[cfg(not(target_os = "linux"))]
fn xattrs_of(_path: &Path) -> io::Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    Ok(BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn identical_small_files_compare_equal() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"0123456789");
        let b = write_file(&dir, "b", b"0123456789");
        let outcome = file_contents_equal(&a, &b).unwrap();
        assert!(outcome.equal);
        assert_eq!(outcome.bytes_compared, 10);
    }

    #[test]
    fn last_byte_difference_is_detected() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"0123456789");
        let b = write_file(&dir, "b", b"012345678X");
        assert!(!file_contents_equal(&a, &b).unwrap().equal);
    }

    #[test]
    fn multi_buffer_files_compare_equal() {
        let dir = TempDir::new().unwrap();
        let content = vec![0x5au8; CMP_BUF_SIZE * 2 + 17];
        let a = write_file(&dir, "a", &content);
        let b = write_file(&dir, "b", &content);
        let outcome = file_contents_equal(&a, &b).unwrap();
        assert!(outcome.equal);
        assert_eq!(outcome.bytes_compared, content.len() as u64);
    }

    #[test]
    fn difference_past_first_buffer_is_detected() {
        let dir = TempDir::new().unwrap();
        let mut c1 = vec![0u8; CMP_BUF_SIZE + 100];
        let c2 = c1.clone();
        c1[CMP_BUF_SIZE + 50] = 1;
        let a = write_file(&dir, "a", &c1);
        let b = write_file(&dir, "b", &c2);
        assert!(!file_contents_equal(&a, &b).unwrap().equal);
    }

    #[test]
    fn empty_files_compare_equal() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"");
        let b = write_file(&dir, "b", b"");
        let outcome = file_contents_equal(&a, &b).unwrap();
        assert!(outcome.equal);
        assert_eq!(outcome.bytes_compared, 0);
    }

    #[test]
    fn plain_temp_files_have_equal_xattrs() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"x");
        let b = write_file(&dir, "b", b"y");
        assert!(SysXattrs.equal_xattrs(&a, &b).unwrap());
    }
}
