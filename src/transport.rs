//! The narrow read/write capability the scanner and replayer need,
//! abstracting local disk from a remote HTTP smart server.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Minimal stat info the scanner needs: kind, size, mtime.
///
/// `mtime_secs` carries fractional seconds: truncating to whole seconds
/// here would make the mtime window and any `PathContent::File::mtime`
/// built from it lossy for filesystems with sub-second resolution.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub kind: EntryKind,
    pub len: u64,
    pub mtime_secs: f64,
}

/// Addresses either a local content tree or a read-only HTTP smart server.
///
/// Write operations (`mkdir`, `rmdir`, `delete`, `rename`, `put_writer`,
/// `create_prefix`) are only meaningful for a destination content tree,
/// which is always local: the HTTP implementation returns a transport
/// error for any of them, matching the smart server's `GET`-only contract.
pub trait Transport: Send + Sync {
    fn list_dir(&self, relpath: &str) -> Result<Vec<String>>;
    fn stat(&self, relpath: &str) -> Result<Stat>;
    fn get_reader(&self, relpath: &str) -> Result<Box<dyn Read>>;
    fn readlink(&self, relpath: &str) -> Result<String>;

    fn put_writer(&self, relpath: &str) -> Result<Box<dyn Write>>;
    fn mkdir(&self, relpath: &str) -> Result<()>;
    fn rmdir(&self, relpath: &str) -> Result<()>;
    fn delete(&self, relpath: &str) -> Result<()>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
    fn symlink(&self, target: &str, relpath: &str) -> Result<()>;
    fn create_prefix(&self, relpath: &str) -> Result<()>;

    /// The local absolute path backing `relpath`, when this transport is
    /// local. Used by `gpgv` invocations that need a real filesystem path
    /// for the keyring.
    fn local_abspath(&self, relpath: &str) -> Option<PathBuf>;
}

/// A transport rooted at a local directory.
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn abspath(&self, relpath: &str) -> PathBuf {
        if relpath.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relpath)
        }
    }
}

impl Transport for LocalTransport {
    fn list_dir(&self, relpath: &str) -> Result<Vec<String>> {
        let path = self.abspath(relpath);
        let mut names = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn stat(&self, relpath: &str) -> Result<Stat> {
        let path = self.abspath(relpath);
        let meta = fs::symlink_metadata(&path)?;
        let kind = if meta.is_dir() {
            EntryKind::Directory
        } else if meta.file_type().is_symlink() {
            EntryKind::Symlink
        } else {
            EntryKind::File
        };
        let mtime_secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Ok(Stat { kind, len: meta.len(), mtime_secs })
    }

    fn get_reader(&self, relpath: &str) -> Result<Box<dyn Read>> {
        Ok(Box::new(fs::File::open(self.abspath(relpath))?))
    }

    fn readlink(&self, relpath: &str) -> Result<String> {
        let target = fs::read_link(self.abspath(relpath))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn put_writer(&self, relpath: &str) -> Result<Box<dyn Write>> {
        Ok(Box::new(fs::File::create(self.abspath(relpath))?))
    }

    fn mkdir(&self, relpath: &str) -> Result<()> {
        match fs::create_dir(self.abspath(relpath)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn rmdir(&self, relpath: &str) -> Result<()> {
        match fs::remove_dir(self.abspath(relpath)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, relpath: &str) -> Result<()> {
        match fs::remove_file(self.abspath(relpath)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        Ok(fs::rename(self.abspath(from), self.abspath(to))?)
    }

    fn symlink(&self, target: &str, relpath: &str) -> Result<()> {
        let path = self.abspath(relpath);
        let _ = fs::remove_file(&path);
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, &path)?;
        #[cfg(not(unix))]
        {
            let _ = target;
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "symlinks are not supported on this platform",
            )));
        }
        Ok(())
    }

    fn create_prefix(&self, relpath: &str) -> Result<()> {
        Ok(fs::create_dir_all(self.abspath(relpath))?)
    }

    fn local_abspath(&self, relpath: &str) -> Option<PathBuf> {
        Some(self.abspath(relpath))
    }
}

/// Read-only transport backed by the HTTP smart server's GET endpoints.
///
/// Every write operation returns `EngineError::Protocol`: a smart server
/// never accepts mutation, only serves snapshots.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::blocking::Client::new() }
    }

    fn url(&self, relpath: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), relpath)
    }

    pub fn get_bytes(&self, relpath: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(self.url(relpath)).send()?;
        if !resp.status().is_success() {
            return Err(EngineError::not_found(format!("{relpath} ({})", resp.status())));
        }
        Ok(resp.bytes()?.to_vec())
    }

    fn unsupported() -> EngineError {
        EngineError::Protocol("write operations are not supported over HTTP transport".into())
    }
}

impl Transport for HttpTransport {
    fn list_dir(&self, _relpath: &str) -> Result<Vec<String>> {
        Err(Self::unsupported())
    }

    fn stat(&self, _relpath: &str) -> Result<Stat> {
        Err(Self::unsupported())
    }

    fn get_reader(&self, relpath: &str) -> Result<Box<dyn Read>> {
        let bytes = self.get_bytes(relpath)?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    fn readlink(&self, _relpath: &str) -> Result<String> {
        Err(Self::unsupported())
    }

    fn put_writer(&self, _relpath: &str) -> Result<Box<dyn Write>> {
        Err(Self::unsupported())
    }

    fn mkdir(&self, _relpath: &str) -> Result<()> {
        Err(Self::unsupported())
    }

    fn rmdir(&self, _relpath: &str) -> Result<()> {
        Err(Self::unsupported())
    }

    fn delete(&self, _relpath: &str) -> Result<()> {
        Err(Self::unsupported())
    }

    fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        Err(Self::unsupported())
    }

    fn symlink(&self, _target: &str, _relpath: &str) -> Result<()> {
        Err(Self::unsupported())
    }

    fn create_prefix(&self, _relpath: &str) -> Result<()> {
        Err(Self::unsupported())
    }

    fn local_abspath(&self, _relpath: &str) -> Option<PathBuf> {
        None
    }
}

pub fn join(dirname: &str, name: &str) -> String {
    if dirname.is_empty() {
        name.to_string()
    } else {
        format!("{dirname}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn local_transport_round_trips_a_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let t = LocalTransport::new(dir.path());
        {
            let mut w = t.put_writer("a.txt")?;
            w.write_all(b"hello").unwrap();
        }
        let mut buf = Vec::new();
        t.get_reader("a.txt")?.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
        Ok(())
    }

    #[test]
    fn local_transport_lists_directories() -> Result<()> {
        let dir = tempdir().unwrap();
        let t = LocalTransport::new(dir.path());
        t.mkdir("sub")?;
        t.put_writer("sub/x")?.write_all(b"1").unwrap();
        let names = t.list_dir("sub")?;
        assert_eq!(names, vec!["x".to_string()]);
        Ok(())
    }

    #[test]
    fn join_handles_empty_dirname() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", "b"), "a/b");
    }
}
