//! The engine's error taxonomy.

use thiserror::Error;

/// Everything that can go wrong inside the engine.
///
/// Variants map directly onto the failure modes of journal parsing,
/// combining, scanning, and replay. `Io` is the catch-all for the
/// residual filesystem/network failures that don't carry more specific
/// meaning.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("bad journal format: {0}")]
    BadFormat(String),

    #[error("conflict at {path}: {detail}")]
    Conflict { path: String, detail: String },

    #[error("missing parent directory for path {0:?}")]
    MissingParent(String),

    #[error("journal is not a from-empty snapshot: path {0:?} is not new")]
    NotASnapshot(String),

    #[error("unexpected kind at {path}: wanted {wanted}, found {found}")]
    UnexpectedKind {
        path: String,
        wanted: &'static str,
        found: &'static str,
    },

    #[error("content mismatch for {path}: {detail}")]
    ContentMismatch { path: String, detail: String },

    #[error("replay stream protocol error: {0}")]
    Protocol(String),

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("mirror set {0:?} already exists")]
    AlreadyExists(String),

    #[error("operation not permitted in current state: {0}")]
    WrongState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bad include/exclude pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl EngineError {
    pub fn conflict(path: impl Into<String>, detail: impl Into<String>) -> Self {
        EngineError::Conflict { path: path.into(), detail: detail.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }
}

pub fn path_string(p: &std::path::Path) -> String {
    p.to_string_lossy().into_owned()
}

pub type Result<T> = std::result::Result<T, EngineError>;
