//! Crash-safe file I/O: atomic writes and metadata preservation.
//!
//! The replayer writes every incoming file body through [`AtomicWriter`],
//! which streams to a sibling `.lmirrortemp` file, verifies its hash and
//! length on commit, and only then renames it into place. A reader can
//! never observe a partially-written file at its final path.

use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::hash::{FileDigest, Hasher};

// 256KB: optimal for modern SSD throughput.
const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Suffix used for in-flight file writes, per the wire spec's deferred
/// rename convention.
pub const TEMP_SUFFIX: &str = ".lmirrortemp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Derive a sibling temp path for `final_path`, e.g. `a/b.txt` ->
/// `a/b.txt.lmirrortemp`. A monotonic counter is appended when multiple
/// writers could race on the same final path within one process.
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut name = final_path.as_os_str().to_owned();
    name.push(format!("{TEMP_SUFFIX}.{counter}"));
    PathBuf::from(name)
}

pub fn set_file_mtime(path: &Path, mtime: SystemTime) -> io::Result<()> {
    let file = File::open(path)?;
    file.set_modified(mtime)?;
    Ok(())
}

#[cfg(unix)]
pub fn set_file_permissions(path: &Path, metadata: &Metadata) -> io::Result<()> {
    fs::set_permissions(path, metadata.permissions())
}

/// Remove a file, ignoring "not found" — replay deletes are idempotent.
pub fn remove_file_safe(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a directory, ignoring "not found".
pub fn remove_dir_safe(path: &Path) -> io::Result<()> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Ensure a directory exists, creating parents as needed.
pub fn ensure_directory(path: &Path) -> io::Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("path exists but is not a directory: {}", path.display()),
            ));
        }
        return Ok(());
    }
    fs::create_dir_all(path)
}

/// Flush directory metadata to disk so a preceding rename is durable.
/// No-op on platforms without directory fsync.
pub fn fsync_directory(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    File::open(path)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Crash-safe atomic file writer.
///
/// Writes to a temp file, then on commit flushes, fsyncs, optionally
/// verifies the written bytes against an expected digest, and renames to
/// the final destination. If dropped without committing, the temp file is
/// removed.
pub struct AtomicWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    hasher: Hasher,
    committed: bool,
}

impl AtomicWriter {
    pub fn create(final_path: PathBuf) -> io::Result<Self> {
        let temp_path = temp_path_for(&final_path);
        let file = File::create(&temp_path)?;
        let writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
        Ok(Self { temp_path, final_path, writer, hasher: Hasher::new(), committed: false })
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)?;
        self.hasher.update(buf);
        Ok(())
    }

    /// Flush, fsync, verify against `expected` (if given), then rename.
    ///
    /// On a digest or length mismatch the temp file is removed and an
    /// error is returned; the caller surfaces this as `ContentMismatch`.
    pub fn commit(mut self, expected: Option<&FileDigest>) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        if let Some(expected) = expected {
            let computed = std::mem::replace(&mut self.hasher, Hasher::new()).finalize();
            if &computed != expected {
                let _ = fs::remove_file(&self.temp_path);
                self.committed = true; // Drop must not try to remove it again.
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "hash mismatch writing {}: expected {expected}, got {computed}",
                        self.final_path.display()
                    ),
                ));
            }
        }

        fs::rename(&self.temp_path, &self.final_path)?;
        self.committed = true;
        Ok(())
    }

    /// The temp path this writer is using, for deferred-rename bookkeeping
    /// in the replayer (`replace` entries rename only after the group's
    /// deletes complete).
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flush and fsync the temp file and verify it against `expected`,
    /// but do not rename it into place. Returns the verified temp path so
    /// the caller can defer the rename (used for `replace` entries, which
    /// rename only after their group's deletes have run).
    pub fn finish_without_rename(mut self, expected: &FileDigest) -> io::Result<PathBuf> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        let computed = std::mem::replace(&mut self.hasher, Hasher::new()).finalize();
        if &computed != expected {
            let _ = fs::remove_file(&self.temp_path);
            self.committed = true;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "hash mismatch writing {}: expected {expected}, got {computed}",
                    self.final_path.display()
                ),
            ));
        }
        self.committed = true;
        Ok(self.temp_path.clone())
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Copy a file locally with streaming I/O, optionally preserving mtime and
/// (on Unix) permissions. Used by the local transport's `get_reader` /
/// `put_writer` plumbing in tests and by the demonstration binary.
pub fn copy_file_with_metadata(source: &Path, dest: &Path, preserve_timestamps: bool) -> io::Result<()> {
    let metadata = fs::metadata(source)?;
    let source_file = File::open(source)?;
    let dest_file = File::create(dest)?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, source_file);
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, dest_file);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    writer.into_inner()?.sync_all()?;

    if preserve_timestamps {
        set_file_mtime(dest, metadata.modified()?)?;
    }
    #[cfg(unix)]
    set_file_permissions(dest, &metadata)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn commit_renames_into_place() -> io::Result<()> {
        let dir = tempdir()?;
        let final_path = dir.path().join("final.txt");
        let mut writer = AtomicWriter::create(final_path.clone())?;
        writer.write(b"hello atomic")?;
        let temp = writer.temp_path().to_path_buf();
        writer.commit(None)?;

        assert!(final_path.exists());
        assert!(!temp.exists());
        assert_eq!(fs::read_to_string(&final_path)?, "hello atomic");
        Ok(())
    }

    #[test]
    fn drop_without_commit_cleans_up_temp() -> io::Result<()> {
        let dir = tempdir()?;
        let final_path = dir.path().join("final.txt");
        let temp_path;
        {
            let mut writer = AtomicWriter::create(final_path.clone())?;
            writer.write(b"uncommitted")?;
            temp_path = writer.temp_path().to_path_buf();
        }
        assert!(!temp_path.exists());
        assert!(!final_path.exists());
        Ok(())
    }

    #[test]
    fn commit_verifies_digest_and_rejects_mismatch() -> io::Result<()> {
        let dir = tempdir()?;
        let final_path = dir.path().join("final.txt");
        let wrong = crate::hash::hash_bytes(b"something else");

        let mut writer = AtomicWriter::create(final_path.clone())?;
        writer.write(b"actual data")?;
        let result = writer.commit(Some(&wrong));

        assert!(result.is_err());
        assert!(!final_path.exists());
        Ok(())
    }

    #[test]
    fn commit_accepts_matching_digest() -> io::Result<()> {
        let dir = tempdir()?;
        let final_path = dir.path().join("final.txt");
        let data = b"verify me";
        let expected = crate::hash::hash_bytes(data);

        let mut writer = AtomicWriter::create(final_path.clone())?;
        writer.write(data)?;
        writer.commit(Some(&expected))?;

        assert!(final_path.exists());
        assert_eq!(fs::read(&final_path)?, data);
        Ok(())
    }

    #[test]
    fn temp_paths_are_unique() {
        let dir = Path::new("/tmp/test");
        let final_path = dir.join("a.txt");
        let p1 = temp_path_for(&final_path);
        let p2 = temp_path_for(&final_path);
        assert_ne!(p1, p2);
    }
}
