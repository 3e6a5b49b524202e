//! Short content digests used to prune long candidate searches.
//!
//! The digest is a 32-bit FNV-1a over at most the first 8 KiB of a file.  It
//! is deliberately weak: its only job is to tell definitely-unequal files
//! apart without paying for a full comparison, so that long chains of inodes
//! with identical metadata hashes do not degenerate into quadratic searches.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const DIGEST_BUF_SIZE: usize = 8192;

pub const FNV1A_BASIS: u32 = 0x811c_9dc5;
const FNV1A_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a digest of a file prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(u32);

fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash = FNV1A_BASIS;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

/// Digest the first 8 KiB of `path` (fewer bytes if the file is shorter; an
/// empty file digests to the FNV basis).  Performs a single read.
pub fn content_digest(path: &Path) -> io::Result<Digest> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; DIGEST_BUF_SIZE];
    let n = file.read(&mut buf)?;
    Ok(Digest(fnv1a_32(&buf[..n])))
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
    fn empty_file_digests_to_basis() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty", b"");
        assert_eq!(content_digest(&path).unwrap(), Digest(FNV1A_BASIS));
    }

    #[test]
    fn digest_matches_in_memory_hash_of_prefix() {
        let dir = TempDir::new().unwrap();
        let content = vec![0xabu8; 20_000];
        let path = write_file(&dir, "big", &content);
        assert_eq!(
            content_digest(&path).unwrap(),
            Digest(fnv1a_32(&content[..DIGEST_BUF_SIZE]))
        );
    }

    #[test]
    fn differing_prefixes_give_differing_digests() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a", b"0123456789");
        let b = write_file(&dir, "b", b"0123456788");
        assert_ne!(content_digest(&a).unwrap(), content_digest(&b).unwrap());
    }

    #[test]
    fn tail_differences_beyond_prefix_are_invisible() {
        let dir = TempDir::new().unwrap();
        let mut c1 = vec![1u8; DIGEST_BUF_SIZE + 100];
        let mut c2 = c1.clone();
        c1[DIGEST_BUF_SIZE + 50] = 2;
        c2[DIGEST_BUF_SIZE + 50] = 3;
        let a = write_file(&dir, "a", &c1);
        let b = write_file(&dir, "b", &c2);
        assert_eq!(content_digest(&a).unwrap(), content_digest(&b).unwrap());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(content_digest(&dir.path().join("nope")).is_err());
    }
}
