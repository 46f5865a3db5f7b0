//! The payload carried by each journal entry: what a path *is*.

use std::fmt;

/// What a single path looked like at the time it was observed.
///
/// `File::mtime` is advisory: it exists purely to let the scanner skip
/// re-hashing unchanged files, and is dropped entirely by v1 journals.
/// Stored as fractional seconds since the epoch, not truncated to whole
/// seconds, so sub-second mtimes round-trip through a v2 journal losslessly.
#[derive(Debug, Clone, PartialEq)]
pub enum PathContent {
    File { sha1: String, length: u64, mtime: Option<f64> },
    Symlink { target: String },
    Directory,
}

impl PathContent {
    pub fn kind(&self) -> &'static str {
        match self {
            PathContent::File { .. } => "file",
            PathContent::Symlink { .. } => "symlink",
            PathContent::Directory => "dir",
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, PathContent::File { .. })
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, PathContent::Directory)
    }

    /// Equality ignoring `mtime`, used when comparing a v1-sourced value
    /// against a v2 one (v1 never carries mtime, so a naive `==` would
    /// spuriously mismatch a payload that only differs by that field).
    pub fn eq_ignoring_mtime(&self, other: &PathContent) -> bool {
        match (self, other) {
            (
                PathContent::File { sha1: a, length: al, .. },
                PathContent::File { sha1: b, length: bl, .. },
            ) => a == b && al == bl,
            (PathContent::Symlink { target: a }, PathContent::Symlink { target: b }) => a == b,
            (PathContent::Directory, PathContent::Directory) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PathContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathContent::File { sha1, length, mtime } => {
                write!(f, "file({sha1}, {length} bytes")?;
                if let Some(m) = mtime {
                    write!(f, ", mtime={m}")?;
                }
                write!(f, ")")
            },
            PathContent::Symlink { target } => write!(f, "symlink -> {target}"),
            PathContent::Directory => write!(f, "dir"),
        }
    }
}
