//! Journals: ordered path mutations and their stable wire encoding.

use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::pathcontent::PathContent;

pub const HEADER_V1: &str = "l-mirror-journal-1\n";
pub const HEADER_V2: &str = "l-mirror-journal-2\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    New,
    Del,
    Replace,
}

impl Action {
    fn as_token(self) -> &'static str {
        match self {
            Action::New => "new",
            Action::Del => "del",
            Action::Replace => "replace",
        }
    }
}

/// The payload associated with a journal entry. `new`/`del` carry a single
/// [`PathContent`]; `replace` carries the (old, new) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(PathContent),
    Replace(PathContent, PathContent),
}

/// An ordered set of path mutations; the atomic unit of replication.
///
/// Invariant: each path appears at most once (enforced by [`Journal::add`]).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Journal {
    pub paths: BTreeMap<String, (Action, Payload)>,
}

impl Journal {
    pub fn new() -> Self {
        Self { paths: BTreeMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Add a mutation to the journal.
    ///
    /// Fails if `relpath` is already present, or if `action` is `Replace`
    /// but `payload` is not a [`Payload::Replace`].
    pub fn add(&mut self, relpath: impl Into<String>, action: Action, payload: Payload) -> Result<()> {
        let relpath = relpath.into();
        if self.paths.contains_key(&relpath) {
            return Err(EngineError::conflict(relpath, "path is already in use"));
        }
        match (action, &payload) {
            (Action::Replace, Payload::Replace(_, _)) => {},
            (Action::Replace, _) => {
                return Err(EngineError::BadFormat(format!(
                    "replace action for {relpath:?} requires a Replace payload"
                )))
            },
            (_, Payload::Replace(_, _)) => {
                return Err(EngineError::BadFormat(format!(
                    "non-replace action for {relpath:?} given a Replace payload"
                )))
            },
            _ => {},
        }
        self.paths.insert(relpath, (action, payload));
        Ok(())
    }

    /// Serialize using the v2 (mtime-preserving) wire format.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(HEADER_V2.as_bytes());
        let mut tokens: Vec<String> = Vec::new();
        for (path, (action, payload)) in &self.paths {
            tokens.push(path.clone());
            tokens.push(action.as_token().to_string());
            match payload {
                Payload::Single(content) => push_kind_tokens(&mut tokens, content),
                Payload::Replace(old, new) => {
                    push_kind_tokens(&mut tokens, old);
                    push_kind_tokens(&mut tokens, new);
                },
            }
        }
        out.extend_from_slice(tokens.join("\0").as_bytes());
        out
    }
}

fn push_kind_tokens(tokens: &mut Vec<String>, content: &PathContent) {
    match content {
        PathContent::File { sha1, length, mtime } => {
            tokens.push("file".to_string());
            tokens.push(sha1.clone());
            tokens.push(length.to_string());
            tokens.push(mtime.map(|m| m.to_string()).unwrap_or_default());
        },
        PathContent::Directory => tokens.push("dir".to_string()),
        PathContent::Symlink { target } => {
            tokens.push("symlink".to_string());
            tokens.push(target.clone());
        },
    }
}

/// Parse a journal from its wire bytes. Accepts both v1 (no mtime) and v2
/// (mtime) headers; any other header is `BadFormat`.
pub fn parse(bytes: &[u8]) -> Result<Journal> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| EngineError::BadFormat(format!("not valid utf8: {e}")))?;
    let (has_mtime, body) = if let Some(rest) = text.strip_prefix(HEADER_V2) {
        (true, rest)
    } else if let Some(rest) = text.strip_prefix(HEADER_V1) {
        (false, rest)
    } else {
        return Err(EngineError::BadFormat(format!(
            "missing or unrecognised journal header in {:?}",
            text.chars().take(32).collect::<String>()
        )));
    };

    let mut tokens: Vec<&str> = body.split('\x00').collect();
    if tokens.last() == Some(&"") {
        tokens.pop();
    }

    let mut journal = Journal::new();
    let mut pos = 0usize;

    fn next<'a>(tokens: &[&'a str], pos: &mut usize) -> Result<&'a str> {
        let t = tokens
            .get(*pos)
            .copied()
            .ok_or_else(|| EngineError::BadFormat("truncated token stream".into()))?;
        *pos += 1;
        Ok(t)
    }

    fn parse_kind(tokens: &[&str], pos: &mut usize, has_mtime: bool) -> Result<PathContent> {
        let kind = next(tokens, pos)?;
        match kind {
            "file" => {
                let sha1 = next(tokens, pos)?.to_string();
                let length: u64 = next(tokens, pos)?
                    .parse()
                    .map_err(|_| EngineError::BadFormat("bad file length token".into()))?;
                let mtime = if has_mtime {
                    let raw = next(tokens, pos)?;
                    if raw.is_empty() {
                        None
                    } else {
                        Some(
                            raw.parse::<f64>()
                                .map_err(|_| EngineError::BadFormat("bad mtime token".into()))?,
                        )
                    }
                } else {
                    None
                };
                Ok(PathContent::File { sha1, length, mtime })
            },
            "dir" => Ok(PathContent::Directory),
            "symlink" => {
                let target = next(tokens, pos)?.to_string();
                Ok(PathContent::Symlink { target })
            },
            other => Err(EngineError::BadFormat(format!("unknown kind token {other:?}"))),
        }
    }

    while pos < tokens.len() {
        let path = next(&tokens, &mut pos)?.to_string();
        let action_tok = next(&tokens, &mut pos)?;
        match action_tok {
            "new" => {
                let c = parse_kind(&tokens, &mut pos, has_mtime)?;
                journal.add(path, Action::New, Payload::Single(c))?;
            },
            "del" => {
                let c = parse_kind(&tokens, &mut pos, has_mtime)?;
                journal.add(path, Action::Del, Payload::Single(c))?;
            },
            "replace" => {
                let old = parse_kind(&tokens, &mut pos, has_mtime)?;
                let new = parse_kind(&tokens, &mut pos, has_mtime)?;
                journal.add(path, Action::Replace, Payload::Replace(old, new))?;
            },
            other => return Err(EngineError::BadFormat(format!("unknown action token {other:?}"))),
        }
    }
    Ok(journal)
}
