//! Content hashing with SHA-1, streamed so memory use stays constant
//! regardless of file size.
//!
//! SHA-1 is not chosen here for collision resistance: it is the wire
//! format's content identifier, and every participant in a mirror network
//! must compute exactly the same 40 hex character digest for the same
//! bytes as every other participant.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha1::{Digest, Sha1};

// 256KB: optimal for SSD read-ahead.
const HASH_BUFFER_SIZE: usize = 256 * 1024;

/// A file's content hash and length, as carried in `PathContent::File`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub sha1_hex: String,
    pub length: u64,
}

impl fmt::Display for FileDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.sha1_hex, self.length)
    }
}

/// A streaming SHA-1 hasher that also tracks the byte count, matching what
/// both the scanner (hashing disk files) and the replayer (verifying
/// incoming file bodies) need.
pub struct Hasher {
    inner: Sha1,
    len: u64,
}

impl Hasher {
    pub fn new() -> Self {
        Self { inner: Sha1::new(), len: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.len += data.len() as u64;
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hash an entire file's contents using streaming I/O.
    pub fn hash_file(&mut self, path: &Path) -> io::Result<()> {
        let file = File::open(path)?;
        let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            self.update(&buffer[..read]);
        }
        Ok(())
    }

    pub fn finalize(self) -> FileDigest {
        let digest = self.inner.finalize();
        FileDigest { sha1_hex: hex::encode(digest), length: self.len }
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a file from disk, returning its digest and length.
pub fn hash_file(path: &Path) -> io::Result<FileDigest> {
    let mut hasher = Hasher::new();
    hasher.hash_file(path)?;
    Ok(hasher.finalize())
}

/// Hash an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> FileDigest {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn known_vector_digits() {
        let digest = hash_bytes(b"1234567890\n");
        assert_eq!(digest.sha1_hex, "12039d6dd9a7e27622301e935b6eefc78846802e");
        assert_eq!(digest.length, 11);
    }

    #[test]
    fn known_vector_abcdef() {
        let digest = hash_bytes(b"abcdef");
        assert_eq!(digest.sha1_hex, "1f8ac10f23c5b5bc1167bda84b833e5c057a77d2");
        assert_eq!(digest.length, 6);
    }

    #[test]
    fn hash_file_matches_hash_bytes() -> io::Result<()> {
        let mut temp = NamedTempFile::new()?;
        let data = b"streaming hash test data";
        temp.write_all(data)?;
        temp.flush()?;

        let from_file = hash_file(temp.path())?;
        let from_memory = hash_bytes(data);
        assert_eq!(from_file, from_memory);
        Ok(())
    }

    #[test]
    fn incremental_hashing_matches_one_shot() {
        let mut hasher = Hasher::new();
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        let incremental = hasher.finalize();
        let one_shot = hash_bytes(b"Hello, World!");
        assert_eq!(incremental, one_shot);
    }

    #[test]
    fn large_file_streams_without_error() -> io::Result<()> {
        let mut temp = NamedTempFile::new()?;
        let chunk = vec![0x42u8; HASH_BUFFER_SIZE];
        for _ in 0..10 {
            temp.write_all(&chunk)?;
        }
        temp.flush()?;
        let digest = hash_file(temp.path())?;
        assert_eq!(digest.length, HASH_BUFFER_SIZE as u64 * 10);
        Ok(())
    }
}
