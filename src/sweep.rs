//! Periodic reconciliation of the mirrored tree against the live
//! filesystem.
//!
//! OS watchers drop notifications under load and cannot cover registration
//! gaps. The sweep walks every mirrored directory, restats it, and when the
//! stored mtime disagrees with the live one it diffs the directory listing
//! against the node's children: create entries for unmirrored names, remove
//! entries for names that no longer exist. The entries
//! land in the main queue and take the normal coalescing path on the next
//! drain; the sweep itself never touches tree membership.

use crate::meta;
use crate::node::NodeId;
use crate::op::Op;
use crate::queue::QueueEntry;
use crate::state::State;
use std::collections::HashSet;
use tracing::debug;

/// One full reconciliation pass from the root.
pub(crate) fn sweep(state: &mut State) {
    let root = state.tree.root();
    let entries = check_tree(state, root);

    if !entries.is_empty() {
        debug!(count = entries.len(), "drift sweep queued corrections");
        for entry in entries {
            state.queue.push(entry);
        }
    }
}

/// Refresh one directory node and diff it when its mtime moved, then
/// descend into every child directory regardless; children can drift
/// without the parent's mtime changing.
fn check_tree(state: &mut State, id: NodeId) -> Vec<QueueEntry> {
    let mut out = Vec::new();

    let prev_mtime = match state.tree.info(id) {
        Some(info) => info.mtime(),
        None => return out,
    };
    match state.tree.stat_refresh(id) {
        Ok(info) => {
            if info.mtime() != prev_mtime {
                out.extend(check_directory(state, id));
            }
        }
        Err(e) => {
            // gone; the parent's diff reports the removal
            debug!(error = %e, "drift sweep: directory vanished");
            return out;
        }
    }

    for (_, child) in state.tree.dir_children(id) {
        out.extend(check_tree(state, child));
    }

    out
}

/// Diff a directory's live listing against its mirrored children.
fn check_directory(state: &mut State, id: NodeId) -> Vec<QueueEntry> {
    let dir_info = match state.tree.info(id) {
        Some(info) => info.clone(),
        None => return Vec::new(),
    };

    let live = match meta::read_dir(dir_info.path()) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir_info.path().display(), error = %e, "drift sweep: listing failed");
            return Vec::new();
        }
    };

    let mut live_dirs = HashSet::new();
    let mut live_files = HashSet::new();
    for info in &live {
        if info.is_dir() {
            live_dirs.insert(info.name().to_string());
        } else {
            live_files.insert(info.name().to_string());
        }
    }

    let tree_dirs = state.tree.dir_children(id);
    let tree_files = state.tree.file_children(id);
    let mut out = Vec::new();

    // live but unmirrored: the coalescer will stat and attach these
    for info in &live {
        let known = if info.is_dir() {
            tree_dirs.iter().any(|(name, _)| name == info.name())
        } else {
            tree_files.iter().any(|(name, _)| name == info.name())
        };
        if !known {
            debug!(path = %info.path().display(), "drift sweep: unmirrored entry");
            out.push(QueueEntry {
                op: Op::CREATE,
                dir: dir_info.path().to_path_buf(),
                base: info.name().to_string(),
                node: None,
                snapshot: None,
            });
        }
    }

    // mirrored but gone
    for (name, child) in tree_dirs.iter().chain(tree_files.iter()) {
        let live_has = if state.tree.info(*child).map(|i| i.is_dir()).unwrap_or(false) {
            live_dirs.contains(name)
        } else {
            live_files.contains(name)
        };
        if !live_has {
            debug!(name = %name, "drift sweep: vanished entry");
            out.push(QueueEntry {
                op: Op::REMOVE,
                dir: dir_info.path().to_path_buf(),
                base: name.clone(),
                node: Some(*child),
                snapshot: state.tree.info(*child).cloned(),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coalesce;
    use crate::watch::NullBackend;
    use filetime::FileTime;
    use std::fs::{self, File};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn ready_state(tmp: &TempDir) -> State {
        let mut state =
            State::new(meta::stat(tmp.path()).unwrap(), Box::new(NullBackend)).unwrap();
        let root = state.tree.root();
        state.append_nodes(root).unwrap();
        state
    }

    /// Force a visible mtime gap even on coarse-granularity filesystems.
    fn backdate(path: &std::path::Path) {
        let past = SystemTime::now() - Duration::from_secs(600);
        filetime::set_file_mtime(path, FileTime::from_system_time(past)).unwrap();
    }

    #[test]
    fn sweep_detects_missed_create() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("usr/etc")).unwrap();
        backdate(&tmp.path().join("usr/etc"));

        let mut state = ready_state(&tmp);

        // created behind the watcher's back
        File::create(tmp.path().join("usr/etc/hosts.conf")).unwrap();
        sweep(&mut state);
        assert_eq!(state.queue.len(), 1);

        let events = coalesce::drain(&mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Op::CREATE);
        assert_eq!(events[0].path, tmp.path().join("usr/etc/hosts.conf"));
        assert!(state
            .find_node(&tmp.path().join("usr/etc/hosts.conf"))
            .is_some());
    }

    #[test]
    fn sweep_detects_missed_remove() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("usr/etc")).unwrap();
        File::create(tmp.path().join("usr/etc/hosts.conf")).unwrap();
        backdate(&tmp.path().join("usr/etc"));

        let mut state = ready_state(&tmp);

        fs::remove_file(tmp.path().join("usr/etc/hosts.conf")).unwrap();
        sweep(&mut state);

        let events = coalesce::drain(&mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Op::REMOVE);
        assert_eq!(events[0].path, tmp.path().join("usr/etc/hosts.conf"));
        assert!(state
            .find_node(&tmp.path().join("usr/etc/hosts.conf"))
            .is_none());
    }

    #[test]
    fn sweep_without_drift_is_silent() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("usr/etc")).unwrap();

        let mut state = ready_state(&tmp);
        sweep(&mut state);
        assert!(state.queue.is_empty());
    }

    #[test]
    fn sweep_descends_past_unchanged_parents() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();
        backdate(&tmp.path().join("a/b/c"));

        let mut state = ready_state(&tmp);

        // only the deep directory changes; ancestors keep their mtime
        File::create(tmp.path().join("a/b/c/new.txt")).unwrap();
        backdate(&tmp.path().join("a"));
        backdate(&tmp.path().join("a/b"));

        sweep(&mut state);
        let events = coalesce::drain(&mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, tmp.path().join("a/b/c/new.txt"));
    }
}
