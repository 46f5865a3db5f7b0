//! Folds a sequence of journals into one, detecting semantic conflicts.

use crate::error::{EngineError, Result};
use crate::journal::{Action, Journal, Payload};
use crate::pathcontent::PathContent;
use crate::tree::Tree;

/// Combines journals into a single net change set.
///
/// Each [`Combiner::add`] is applied atomically: on error the accumulator
/// is left exactly as it was before the call, so a caller can retry with a
/// different input or abort without rolling anything back by hand.
#[derive(Debug, Clone, Default)]
pub struct Combiner {
    pub journal: Journal,
}

impl Combiner {
    pub fn new() -> Self {
        Self { journal: Journal::new() }
    }

    /// Fold `incoming` into the accumulated journal.
    pub fn add(&mut self, incoming: &Journal) -> Result<()> {
        let mut pending_del: Vec<String> = Vec::new();
        let mut merged: Vec<(String, Action, Payload)> = Vec::new();

        for (path, (new_action, new_payload)) in &incoming.paths {
            let Some((old_action, old_payload)) = self.journal.paths.get(path) else {
                continue;
            };
            let resolved = resolve(path, *old_action, old_payload, *new_action, new_payload)?;
            match resolved {
                Resolution::Drop => pending_del.push(path.clone()),
                Resolution::Replace(action, payload) => merged.push((path.clone(), action, payload)),
            }
        }

        // Only mutate the accumulator once every path has resolved successfully.
        for (path, (action, payload)) in &incoming.paths {
            self.journal.paths.insert(path.clone(), (*action, payload.clone()));
        }
        for (path, action, payload) in merged {
            self.journal.paths.insert(path, (action, payload));
        }
        for path in pending_del {
            self.journal.paths.remove(&path);
        }
        Ok(())
    }

    /// Convert a from-empty combined journal into a [`Tree`].
    ///
    /// Fails with `MissingParent` if an entry's parent directory has not
    /// itself appeared yet, or `NotASnapshot` if any `del`/`replace` is
    /// present (only meaningful starting from an empty tree).
    pub fn as_tree(&self) -> Result<Tree> {
        let mut root = Tree::empty_dir();
        for (path, (action, payload)) in &self.journal.paths {
            if *action != Action::New {
                return Err(EngineError::NotASnapshot(path.clone()));
            }
            let content = match payload {
                Payload::Single(c) => c,
                Payload::Replace(_, _) => unreachable!("new action never carries a Replace payload"),
            };
            let segments: Vec<&str> = path.split('/').collect();
            let mut cwd = &mut root;
            for segment in &segments[..segments.len() - 1] {
                let Tree::Dir(map) = cwd else {
                    return Err(EngineError::MissingParent(path.clone()));
                };
                cwd = map
                    .get_mut(*segment)
                    .ok_or_else(|| EngineError::MissingParent(path.clone()))?;
            }
            let Tree::Dir(map) = cwd else {
                return Err(EngineError::MissingParent(path.clone()));
            };
            let leaf = match content {
                PathContent::Directory => Tree::empty_dir(),
                other => Tree::Leaf(other.clone()),
            };
            map.insert(segments[segments.len() - 1].to_string(), leaf);
        }
        Ok(root)
    }
}

enum Resolution {
    Drop,
    Replace(Action, Payload),
}

fn resolve(
    path: &str,
    old_action: Action,
    old_payload: &Payload,
    new_action: Action,
    new_payload: &Payload,
) -> Result<Resolution> {
    use Action::*;
    match (old_action, new_action) {
        (New, New) => Err(EngineError::conflict(path, "attempt to add twice")),
        (New, Del) => {
            let Payload::Single(old_c) = old_payload else { unreachable!() };
            let Payload::Single(new_c) = new_payload else { unreachable!() };
            if old_c != new_c {
                return Err(EngineError::conflict(
                    path,
                    format!("attempt to delete wrong content: had {old_c}, deleting {new_c}"),
                ));
            }
            Ok(Resolution::Drop)
        },
        (New, Replace) => {
            let Payload::Single(old_c) = old_payload else { unreachable!() };
            let Payload::Replace(replace_old, replace_new) = new_payload else { unreachable!() };
            if old_c != replace_old {
                return Err(EngineError::conflict(
                    path,
                    format!("attempt to replace wrong content: had {old_c}, expected {replace_old}"),
                ));
            }
            Ok(Resolution::Replace(New, Payload::Single(replace_new.clone())))
        },
        (Del, New) => {
            let Payload::Single(old_c) = old_payload else { unreachable!() };
            let Payload::Single(new_c) = new_payload else { unreachable!() };
            Ok(Resolution::Replace(Replace, Payload::Replace(old_c.clone(), new_c.clone())))
        },
        (Del, Del) => Err(EngineError::conflict(path, "attempt to delete twice")),
        (Del, Replace) => Err(EngineError::conflict(path, "attempt to replace a deleted path")),
        (Replace, New) => Err(EngineError::conflict(path, "attempt to add twice")),
        (Replace, Del) => {
            let Payload::Replace(orig_old, orig_new) = old_payload else { unreachable!() };
            let Payload::Single(new_c) = new_payload else { unreachable!() };
            if orig_new != new_c {
                return Err(EngineError::conflict(
                    path,
                    format!("attempt to delete wrong content: had {orig_new}, deleting {new_c}"),
                ));
            }
            Ok(Resolution::Replace(Del, Payload::Single(orig_old.clone())))
        },
        (Replace, Replace) => {
            let Payload::Replace(orig_old, orig_new) = old_payload else { unreachable!() };
            let Payload::Replace(replace_old, replace_new) = new_payload else { unreachable!() };
            if orig_new != replace_old {
                return Err(EngineError::conflict(
                    path,
                    format!("attempt to replace wrong content: had {orig_new}, expected {replace_old}"),
                ));
            }
            Ok(Resolution::Replace(Replace, Payload::Replace(orig_old.clone(), replace_new.clone())))
        },
    }
}
