//! Compares a prior tree model against a content transport and emits the
//! journal of what changed.

use rayon::prelude::*;
use regex::Regex;

use crate::error::Result;
use crate::filter::FilterCombiner;
use crate::hint::ChangeHints;
use crate::journal::{Action, Journal, Payload};
use crate::pathcontent::PathContent;
use crate::transport::{self, EntryKind, Transport};
use crate::tree::Tree;

/// Paths ending in this are never reported: metadata is transmitted by the
/// act of fetching a journal, not by scanning it as content.
const ALWAYS_SKIP_SUFFIX: &str = ".lmirror/metadata";

pub struct ScanOptions<'a> {
    pub set_name: &'a str,
    pub last_timestamp: f64,
    pub user_includes: &'a [String],
    pub user_excludes: &'a [String],
    pub filter_programs: &'a [String],
    pub hints: Option<&'a ChangeHints>,
}

/// Builds the include regex: the baked-in `.lmirror/sets/<name>` rule
/// OR-joined with user includes.
fn build_include_regex(set_name: &str, user_includes: &[String]) -> Result<Regex> {
    let escaped_name = regex::escape(set_name);
    let mut alts = vec![format!(r"(?:^|/)\.lmirror/sets(?:$|/{escaped_name}(?:$|/))")];
    alts.extend(user_includes.iter().cloned());
    Ok(Regex::new(&alts.join("|"))?)
}

/// Builds the exclude regex: the baked-in `.lmirror/` rule OR-joined with
/// user excludes.
fn build_exclude_regex(user_excludes: &[String]) -> Result<Regex> {
    let mut alts = vec![r"(?:^|/)\.lmirror/".to_string()];
    alts.extend(user_excludes.iter().cloned());
    Ok(Regex::new(&alts.join("|"))?)
}

fn is_always_skipped(path: &str) -> bool {
    path.ends_with(ALWAYS_SKIP_SUFFIX) || is_temp_artifact(path)
}

/// Matches both the canonical in-flight marker `PATH.lmirrortemp` and the
/// numbered variant `PATH.lmirrortemp.N` that `AtomicWriter` leaves behind
/// when a crash interrupts a write before the rename: `temp_path_for`
/// appends a counter to disambiguate concurrent writers to the same final
/// path, so a leftover temp file's real suffix is never the bare constant.
fn is_temp_artifact(path: &str) -> bool {
    let Some(idx) = path.find(crate::io::TEMP_SUFFIX) else { return false };
    let tail = &path[idx + crate::io::TEMP_SUFFIX.len()..];
    tail.is_empty() || (tail.starts_with('.') && tail.len() > 1 && tail[1..].bytes().all(|b| b.is_ascii_digit()))
}

/// Scans `transport` against `prior_tree`, returning the journal of
/// differences. `prior_tree` is normally `Combiner::as_tree()` applied to
/// the set's basis..latest journal range.
pub fn scan(transport: &dyn Transport, prior_tree: &Tree, opts: ScanOptions<'_>) -> Result<Journal> {
    let include = build_include_regex(opts.set_name, opts.user_includes)?;
    let exclude = build_exclude_regex(opts.user_excludes)?;
    let mut filters = FilterCombiner::spawn_all(opts.filter_programs)?;

    let result = scan_inner(transport, prior_tree, &opts, &include, &exclude);
    filters.close_all();
    result
}

fn scan_inner(
    transport: &dyn Transport,
    prior_tree: &Tree,
    opts: &ScanOptions<'_>,
    include: &Regex,
    exclude: &Regex,
) -> Result<Journal> {
    let mut journal = Journal::new();
    let mut pending: Vec<String> = vec![String::new()];

    while let Some(dirname) = pending.pop() {
        let names = transport.list_dir(&dirname)?;
        let cwd = lookup_dir(prior_tree, &dirname);

        let empty = std::collections::BTreeMap::new();
        let prior_children = cwd.and_then(Tree::as_dir).unwrap_or(&empty);

        let disk_names: std::collections::BTreeSet<&str> =
            names.iter().map(String::as_str).collect();

        // Deletes: names the prior tree had that disk no longer has. A
        // deleted directory's entire prior subtree must be walked too, so
        // replay sees a `del` for every descendant and never calls `rmdir`
        // on a directory replay itself has not already emptied out.
        for (name, child) in prior_children {
            if disk_names.contains(name.as_str()) {
                continue;
            }
            let path = transport::join(&dirname, name);
            if let Tree::Dir(children) = child {
                emit_subtree_deletes(&mut journal, &path, children)?;
            }
            if is_always_skipped(&path) {
                continue;
            }
            journal.add(path, Action::Del, Payload::Single(child.as_path_content()))?;
        }

        // Files awaiting a hash: collected so the expensive read+sha1 work
        // can run across a worker pool instead of one file at a time, the
        // way the teacher's own directory scan parallelizes hashing.
        let mut to_hash: Vec<(String, bool, f64)> = Vec::new();

        for name in &names {
            let path = transport::join(&dirname, name);
            if is_always_skipped(&path) {
                continue;
            }
            let is_new_name = !prior_children.contains_key(name);

            if !is_new_name {
                let is_content_excluded = exclude.is_match(&path) && !include.is_match(&path);
                if is_content_excluded {
                    continue;
                }
            } else if exclude.is_match(&path) && !include.is_match(&path) {
                continue;
            }

            let stat = transport.stat(&path)?;
            let hinted = opts.hints.is_some_and(|h| h.contains(&path));
            if !is_new_name && !hinted && opts.last_timestamp - stat.mtime_secs > 3.0 {
                // Old enough and not freshly hinted: trust the prior payload.
                continue;
            }

            match stat.kind {
                EntryKind::Directory => {
                    pending.push(path.clone());
                    let new_content = PathContent::Directory;
                    if is_new_name {
                        journal.add(path, Action::New, Payload::Single(new_content))?;
                    } else {
                        let old_content = prior_children[name].as_path_content();
                        if !old_content.eq_ignoring_mtime(&new_content) {
                            journal.add(path, Action::Replace, Payload::Replace(old_content, new_content))?;
                        }
                    }
                },
                EntryKind::Symlink => {
                    let target = transport.readlink(&path)?;
                    let new_content = PathContent::Symlink { target };
                    if is_new_name {
                        journal.add(path, Action::New, Payload::Single(new_content))?;
                    } else {
                        let old_content = prior_children[name].as_path_content();
                        if !old_content.eq_ignoring_mtime(&new_content) {
                            journal.add(path, Action::Replace, Payload::Replace(old_content, new_content))?;
                        }
                    }
                },
                EntryKind::File => to_hash.push((path, is_new_name, stat.mtime_secs)),
            }
        }

        let hashed: Vec<Result<(String, bool, PathContent)>> = to_hash
            .par_iter()
            .map(|(path, is_new_name, mtime_secs)| {
                let mut hasher = crate::hash::Hasher::new();
                let mut reader = transport.get_reader(path)?;
                let mut buf = [0u8; 64 * 1024];
                loop {
                    let n = std::io::Read::read(&mut reader, &mut buf)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                let digest = hasher.finalize();
                let content = PathContent::File {
                    sha1: digest.sha1_hex,
                    length: digest.length,
                    mtime: Some(*mtime_secs),
                };
                Ok((path.clone(), *is_new_name, content))
            })
            .collect();

        for result in hashed {
            let (path, is_new_name, new_content) = result?;
            if is_new_name {
                journal.add(&path, Action::New, Payload::Single(new_content))?;
            } else {
                let name = path.rsplit('/').next().unwrap();
                let old_content = prior_children[name].as_path_content();
                if !old_content.eq_ignoring_mtime(&new_content) {
                    journal.add(path, Action::Replace, Payload::Replace(old_content, new_content))?;
                }
            }
        }
    }

    Ok(journal)
}

/// Recursively emits a `del` for every descendant of a directory that has
/// disappeared from disk, deepest entries first. The replay side re-sorts
/// `del`s in descending path order regardless of journal insertion order,
/// so the only requirement here is completeness: every path the prior tree
/// knew about under `dirpath` must get its own entry.
fn emit_subtree_deletes(
    journal: &mut Journal,
    dirpath: &str,
    children: &std::collections::BTreeMap<String, Tree>,
) -> Result<()> {
    for (name, child) in children {
        let path = transport::join(dirpath, name);
        if let Tree::Dir(grandchildren) = child {
            emit_subtree_deletes(journal, &path, grandchildren)?;
        }
        if is_always_skipped(&path) {
            continue;
        }
        journal.add(path, Action::Del, Payload::Single(child.as_path_content()))?;
    }
    Ok(())
}

fn lookup_dir<'a>(tree: &'a Tree, dirname: &str) -> Option<&'a Tree> {
    if dirname.is_empty() {
        return Some(tree);
    }
    let mut cwd = tree;
    for segment in dirname.split('/') {
        cwd = cwd.child(segment)?;
    }
    Some(cwd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use tempfile::tempdir;

    fn empty_tree() -> Tree {
        Tree::empty_dir()
    }

    fn base_opts() -> (Vec<String>, Vec<String>, Vec<String>) {
        (Vec::new(), Vec::new(), Vec::new())
    }

    #[test]
    fn new_file_at_root_is_reported() -> Result<()> {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"1234567890\n").unwrap();
        let t = LocalTransport::new(dir.path());
        let (inc, exc, prog) = base_opts();

        let journal = scan(
            &t,
            &empty_tree(),
            ScanOptions {
                set_name: "myset",
                last_timestamp: 0.0,
                user_includes: &inc,
                user_excludes: &exc,
                filter_programs: &prog,
                hints: None,
            },
        )?;

        let (action, payload) = &journal.paths["a.txt"];
        assert_eq!(*action, Action::New);
        match payload {
            Payload::Single(PathContent::File { sha1, length, .. }) => {
                assert_eq!(sha1, "12039d6dd9a7e27622301e935b6eefc78846802e");
                assert_eq!(*length, 11);
            },
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn other_sets_are_excluded() -> Result<()> {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".lmirror/sets/other")).unwrap();
        std::fs::write(dir.path().join(".lmirror/sets/other/format"), b"1\n").unwrap();
        let t = LocalTransport::new(dir.path());
        let (inc, exc, prog) = base_opts();

        let journal = scan(
            &t,
            &empty_tree(),
            ScanOptions {
                set_name: "myset",
                last_timestamp: 0.0,
                user_includes: &inc,
                user_excludes: &exc,
                filter_programs: &prog,
                hints: None,
            },
        )?;

        assert!(journal.paths.is_empty(), "expected no entries, got {:?}", journal.paths.keys().collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn deleted_file_is_reported() -> Result<()> {
        let dir = tempdir().unwrap();
        let t = LocalTransport::new(dir.path());

        let mut prior = std::collections::BTreeMap::new();
        prior.insert(
            "gone.txt".to_string(),
            Tree::Leaf(PathContent::File { sha1: "x".into(), length: 1, mtime: None }),
        );
        let prior_tree = Tree::Dir(prior);
        let (inc, exc, prog) = base_opts();

        let journal = scan(
            &t,
            &prior_tree,
            ScanOptions {
                set_name: "myset",
                last_timestamp: 0.0,
                user_includes: &inc,
                user_excludes: &exc,
                filter_programs: &prog,
                hints: None,
            },
        )?;

        let (action, _) = &journal.paths["gone.txt"];
        assert_eq!(*action, Action::Del);
        Ok(())
    }

    #[test]
    fn unchanged_old_file_is_skipped_via_mtime_window() -> Result<()> {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"content").unwrap();
        let t = LocalTransport::new(dir.path());

        let mut prior = std::collections::BTreeMap::new();
        prior.insert(
            "a.txt".to_string(),
            Tree::Leaf(PathContent::File { sha1: "stale-sha".into(), length: 999, mtime: None }),
        );
        let prior_tree = Tree::Dir(prior);
        let (inc, exc, prog) = base_opts();

        // last_timestamp far in the future relative to the file's real mtime
        let far_future = f64::MAX / 2.0;
        let journal = scan(
            &t,
            &prior_tree,
            ScanOptions {
                set_name: "myset",
                last_timestamp: far_future,
                user_includes: &inc,
                user_excludes: &exc,
                filter_programs: &prog,
                hints: None,
            },
        )?;

        assert!(journal.paths.is_empty());
        Ok(())
    }

    #[test]
    fn deleted_directory_reports_every_descendant() -> Result<()> {
        let dir = tempdir().unwrap();
        let t = LocalTransport::new(dir.path());

        let mut grandchildren = std::collections::BTreeMap::new();
        grandchildren.insert(
            "leaf.txt".to_string(),
            Tree::Leaf(PathContent::File { sha1: "x".into(), length: 1, mtime: None }),
        );
        let mut children = std::collections::BTreeMap::new();
        children.insert("sub".to_string(), Tree::Dir(grandchildren));
        children.insert(
            "file.txt".to_string(),
            Tree::Leaf(PathContent::File { sha1: "y".into(), length: 2, mtime: None }),
        );
        let mut prior = std::collections::BTreeMap::new();
        prior.insert("gonedir".to_string(), Tree::Dir(children));
        let prior_tree = Tree::Dir(prior);
        let (inc, exc, prog) = base_opts();

        let journal = scan(
            &t,
            &prior_tree,
            ScanOptions {
                set_name: "myset",
                last_timestamp: 0.0,
                user_includes: &inc,
                user_excludes: &exc,
                filter_programs: &prog,
                hints: None,
            },
        )?;

        for path in ["gonedir", "gonedir/file.txt", "gonedir/sub", "gonedir/sub/leaf.txt"] {
            let (action, _) = journal.paths.get(path).unwrap_or_else(|| panic!("missing del for {path}"));
            assert_eq!(*action, Action::Del);
        }
        assert_eq!(journal.paths.len(), 4);
        Ok(())
    }
}
