//! The nested tree model folded from a combined, from-empty journal.

use std::collections::BTreeMap;

use crate::pathcontent::PathContent;

/// Either a directory's children, or a leaf payload.
///
/// `BTreeMap` gives deterministic, lexicographic iteration order for free,
/// which both `Combiner::as_tree` and the scanner rely on.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    Dir(BTreeMap<String, Tree>),
    Leaf(PathContent),
}

impl Tree {
    pub fn empty_dir() -> Self {
        Tree::Dir(BTreeMap::new())
    }

    pub fn as_dir(&self) -> Option<&BTreeMap<String, Tree>> {
        match self {
            Tree::Dir(m) => Some(m),
            Tree::Leaf(_) => None,
        }
    }

    /// The `PathContent` an entry would have if it were itself a journal
    /// payload: a `Dir` node maps to `PathContent::Directory`, a leaf to
    /// its own content.
    pub fn as_path_content(&self) -> PathContent {
        match self {
            Tree::Dir(_) => PathContent::Directory,
            Tree::Leaf(c) => c.clone(),
        }
    }

    /// Look up a child of a directory node by path component.
    pub fn child(&self, name: &str) -> Option<&Tree> {
        self.as_dir().and_then(|m| m.get(name))
    }
}
