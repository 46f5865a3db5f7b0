//! Turns a combined journal into an ordered stream of replay entries, and
//! applies that stream to a destination content tree.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::hash::FileDigest;
use crate::io::AtomicWriter;
use crate::journal::{Action, Journal, Payload};
use crate::pathcontent::PathContent;
use crate::transport::Transport;

/// One unit of replay work, mirroring the wire framing: path, action,
/// payload, and (for file `new`/`replace`-new entries) the body bytes.
#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub path: String,
    pub action: Action,
    pub payload: Payload,
    pub body: Option<Vec<u8>>,
}

/// Produces the ordered entry stream for a combined journal: `new`
/// ascending, `replace` descending, `del` descending.
pub struct ReplayGenerator<'a> {
    journal: &'a Journal,
    content: &'a dyn Transport,
}

impl<'a> ReplayGenerator<'a> {
    pub fn new(journal: &'a Journal, content: &'a dyn Transport) -> Self {
        Self { journal, content }
    }

    /// Produce the ordered entry stream, reading file bodies from
    /// `self.content` as each entry is built.
    pub fn generate(&self) -> Result<Vec<ReplayEntry>> {
        let mut news: Vec<&String> = Vec::new();
        let mut replaces: Vec<&String> = Vec::new();
        let mut dels: Vec<&String> = Vec::new();

        for (path, (action, _)) in &self.journal.paths {
            match action {
                Action::New => news.push(path),
                Action::Replace => replaces.push(path),
                Action::Del => dels.push(path),
            }
        }
        news.sort();
        replaces.sort_by(|a, b| b.cmp(a));
        dels.sort_by(|a, b| b.cmp(a));

        let mut entries = Vec::with_capacity(self.journal.len());
        for path in news.into_iter().chain(replaces).chain(dels) {
            let (action, payload) = &self.journal.paths[path];
            let new_content = match (action, payload) {
                (Action::New, Payload::Single(c)) => Some(c),
                (Action::Replace, Payload::Replace(_, new_c)) => Some(new_c),
                _ => None,
            };
            let body = match new_content {
                Some(PathContent::File { .. }) => Some(self.read_body(path)?),
                _ => None,
            };
            entries.push(ReplayEntry { path: path.clone(), action: *action, payload: payload.clone(), body });
        }
        Ok(entries)
    }

    fn read_body(&self, relpath: &str) -> Result<Vec<u8>> {
        let mut reader = self.content.get_reader(relpath)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Convenience wrapper: build a generator over `journal` and `content` and
/// produce its entry stream in one call.
pub fn generate_with_bodies(journal: &Journal, content: &dyn Transport) -> Result<Vec<ReplayEntry>> {
    ReplayGenerator::new(journal, content).generate()
}

/// Applies a replay entry stream to a local destination rooted at
/// `dest_root`, cross-checking each entry against an independently-known
/// expected combined journal.
pub struct Replayer<'a> {
    dest_root: &'a Path,
    expected: HashMap<String, (Action, Payload)>,
    deferred_renames: Vec<(std::path::PathBuf, std::path::PathBuf)>,
}

impl<'a> Replayer<'a> {
    pub fn new(dest_root: &'a Path, expected: &Journal) -> Self {
        Self {
            dest_root,
            expected: expected.paths.clone().into_iter().collect(),
            deferred_renames: Vec::new(),
        }
    }

    pub fn replay(&mut self, entries: &[ReplayEntry]) -> Result<()> {
        for entry in entries {
            self.cross_check(entry)?;
            match entry.action {
                Action::New => self.apply_new(entry)?,
                Action::Replace => self.apply_replace(entry)?,
                Action::Del => self.apply_del(entry)?,
            }
        }
        self.finish_deferred_renames()?;
        Ok(())
    }

    fn cross_check(&mut self, entry: &ReplayEntry) -> Result<()> {
        match self.expected.remove(&entry.path) {
            Some((action, payload)) if action == entry.action && payload == entry.payload => Ok(()),
            Some(_) => Err(EngineError::Protocol(format!(
                "entry for {:?} does not match the expected combined journal",
                entry.path
            ))),
            None => Err(EngineError::Protocol(format!(
                "unexpected entry for {:?}: not present in the expected combined journal",
                entry.path
            ))),
        }
    }

    fn abspath(&self, relpath: &str) -> std::path::PathBuf {
        self.dest_root.join(relpath)
    }

    fn apply_new(&mut self, entry: &ReplayEntry) -> Result<()> {
        let Payload::Single(content) = &entry.payload else {
            return Err(EngineError::Protocol(format!("new entry for {:?} missing payload", entry.path)));
        };
        self.materialize(&entry.path, content, entry.body.as_deref(), true)
    }

    fn apply_replace(&mut self, entry: &ReplayEntry) -> Result<()> {
        let Payload::Replace(_, new_content) = &entry.payload else {
            return Err(EngineError::Protocol(format!("replace entry for {:?} missing payload", entry.path)));
        };
        self.materialize(&entry.path, new_content, entry.body.as_deref(), false)
    }

    /// Write `content` at `relpath`. Files are staged via `AtomicWriter`;
    /// for a `new` the rename happens immediately, for a `replace` it is
    /// deferred until after this group's deletes, so a reader never
    /// observes the old file already gone but the new one not yet there.
    fn materialize(
        &mut self,
        relpath: &str,
        content: &PathContent,
        body: Option<&[u8]>,
        rename_immediately: bool,
    ) -> Result<()> {
        let path = self.abspath(relpath);
        match content {
            PathContent::Directory => {
                match fs::create_dir(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        if path.is_dir() {
                            Ok(())
                        } else {
                            Err(EngineError::UnexpectedKind { path: relpath.to_string(), wanted: "dir", found: "other" })
                        }
                    },
                    Err(e) => Err(e.into()),
                }
            },
            PathContent::Symlink { target } => {
                if path.exists() && fs::symlink_metadata(&path)?.file_type().is_symlink() {
                    fs::remove_file(&path)?;
                } else if path.exists() {
                    return Err(EngineError::UnexpectedKind {
                        path: relpath.to_string(),
                        wanted: "symlink",
                        found: "other",
                    });
                }
                #[cfg(unix)]
                std::os::unix::fs::symlink(target, &path)?;
                #[cfg(not(unix))]
                {
                    let _ = target;
                }
                Ok(())
            },
            PathContent::File { sha1, length, .. } => {
                if path.exists() && path.is_file() {
                    if let Ok(existing) = fs::metadata(&path) {
                        if existing.len() == *length {
                            let matches = crate::hash::hash_file(&path)
                                .map(|digest| &digest.sha1_hex == sha1)
                                .unwrap_or(false);
                            if matches {
                                return Ok(());
                            }
                        }
                    }
                }
                let mut writer = AtomicWriter::create(path.clone())?;
                let body = body.ok_or_else(|| {
                    EngineError::Protocol(format!("file entry for {relpath:?} carries no body"))
                })?;
                writer.write(body)?;
                let expected = FileDigest { sha1_hex: sha1.clone(), length: *length };
                if rename_immediately {
                    writer.commit(Some(&expected)).map_err(|e| {
                        EngineError::ContentMismatch { path: relpath.to_string(), detail: e.to_string() }
                    })
                } else {
                    let final_path = writer.final_path().to_path_buf();
                    let staged = writer.finish_without_rename(&expected).map_err(|e| {
                        EngineError::ContentMismatch { path: relpath.to_string(), detail: e.to_string() }
                    })?;
                    self.deferred_renames.push((staged, final_path));
                    Ok(())
                }
            },
        }
    }

    fn apply_del(&mut self, entry: &ReplayEntry) -> Result<()> {
        let path = self.abspath(&entry.path);
        let Payload::Single(content) = &entry.payload else {
            return Err(EngineError::Protocol(format!("del entry for {:?} missing payload", entry.path)));
        };
        match content {
            PathContent::Directory => crate::io::remove_dir_safe(&path).map_err(Into::into),
            _ => crate::io::remove_file_safe(&path).map_err(Into::into),
        }
    }

    fn finish_deferred_renames(&mut self) -> Result<()> {
        for (staged, final_path) in self.deferred_renames.drain(..) {
            fs::rename(&staged, &final_path)?;
        }
        Ok(())
    }
}
