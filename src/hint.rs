//! An optional, host-populated store of paths known to have changed
//! recently, used by the scanner to bypass the mtime-skip window.
//!
//! This crate does not run its own filesystem watcher; a host that has
//! one (inotify, FSEvents, a USN journal reader) can feed it into a
//! `ChangeHints` and pass it to the scanner. Pulling a hint list from an
//! HTTP smart server's `/changes/<name>` endpoint is just another writer
//! of this same store.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
pub struct ChangeHints {
    paths: Mutex<HashSet<String>>,
}

impl ChangeHints {
    pub fn new() -> Self {
        Self { paths: Mutex::new(HashSet::new()) }
    }

    pub fn from_paths(paths: impl IntoIterator<Item = String>) -> Self {
        Self { paths: Mutex::new(paths.into_iter().collect()) }
    }

    pub fn mark_changed(&self, path: impl Into<String>) {
        self.paths.lock().unwrap().insert(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.lock().unwrap().contains(path)
    }

    pub fn clear(&self) {
        self.paths.lock().unwrap().clear();
    }
}
