//! Turns the sorted raw-event queue into coalesced semantic events.
//!
//! One drain pops every queued entry, mutates the mirror to match what the
//! entry implies, and folds entries that concern the same inode into a
//! single event. A create and a remove (or rename) of one inode inside one
//! drain is the signature of a rename, rewritten to `MOVE` at the end.

use crate::error::{WatchError, WatchResult};
use crate::event::Event;
use crate::meta::{self, FileInfo};
use crate::node::NodeId;
use crate::op::Op;
use crate::queue::QueueEntry;
use crate::state::State;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Intermediate per-inode event being assembled during a drain.
///
/// `info` is snapshotted when the branch runs, so the disappearance half of
/// a move keeps its pre-rename path even after the node is rehomed.
struct NodeEvent {
    op: Op,
    info: FileInfo,
    node: Option<NodeId>,
    before_path: Option<PathBuf>,
}

/// Drain the queue, producing events in sorted order. Entries that fail
/// (entity vanished, malformed) are dropped; the batch continues.
pub(crate) fn drain(state: &mut State) -> Vec<Event> {
    if state.queue.is_empty() {
        return Vec::new();
    }
    state.queue.sort();

    let mut batch: Vec<NodeEvent> = Vec::new();
    while let Some(entry) = state.queue.pop() {
        let path = entry.path();
        if let Err(e) = apply(state, entry, &mut batch) {
            debug!(path = %path.display(), error = %e, "queue entry dropped");
        }
    }

    update_op(&mut batch);

    let mut events = Vec::with_capacity(batch.len());
    for ne in &batch {
        if ne.op.is_writable() && !ne.info.is_dir() {
            if let Some(id) = ne.node {
                if state.tree.contains(id) {
                    state.writes.insert(ne.info.ino(), id);
                }
            }
        }
        events.push(Event::from_info(ne.op, &ne.info, ne.before_path.clone()));
    }

    events
}

fn apply(state: &mut State, entry: QueueEntry, batch: &mut Vec<NodeEvent>) -> WatchResult<()> {
    let entry_path = entry.path();

    let ne = if entry.op.contains(Op::CREATE) {
        Some(create_branch(state, &entry)?)
    } else if entry.op.intersects(Op::REMOVE | Op::RENAME) {
        Some(detach_branch(state, &entry)?)
    } else if entry.op.contains(Op::WRITE) {
        write_branch(state, &entry)?
    } else {
        // chmod carries no tree consequence and emits nothing
        None
    };

    if let Some(ne) = ne {
        merge(batch, ne, &entry_path);
    }

    Ok(())
}

/// A create either lands a rename (the inode is already mirrored
/// elsewhere) or attaches a new subtree, enqueuing creates for everything
/// discovered beneath it.
fn create_branch(state: &mut State, entry: &QueueEntry) -> WatchResult<NodeEvent> {
    let path = entry.path();
    let fi = meta::stat(&path)?;

    let id = match state.index.get(fi.ino()) {
        Some(existing) => {
            let old_path = state
                .tree
                .info(existing)
                .ok_or_else(|| WatchError::structure("indexed node missing from tree"))?
                .path()
                .to_path_buf();
            // queued entries under the old location are about to be stale
            state.queue.rename_prefix(&old_path, fi.path());
            state.rename_node(existing, fi.dir(), fi.name())?;
            existing
        }
        None => {
            let id = state.create_add_node(&path)?;
            if state.tree.info(id).map(|i| i.is_dir()).unwrap_or(false) {
                // mkdir -p style batch creation arrives as one notification
                state.append_nodes(id)?;
                let children = state.tree.children(id);
                state.enqueue_from_nodes(&children, Op::CREATE);
            }
            id
        }
    };

    let info = state
        .tree
        .info(id)
        .cloned()
        .ok_or_else(|| WatchError::structure("created node missing from tree"))?;

    Ok(NodeEvent {
        op: entry.op,
        info,
        node: Some(id),
        before_path: None,
    })
}

/// Remove and rename share a branch: a raw rename with no follow-up create
/// in the batch is a departure from the watched tree, i.e. a removal. The
/// node is only detached when it still lives at the entry's path, since an
/// earlier create in the same drain may have rehomed it.
fn detach_branch(state: &mut State, entry: &QueueEntry) -> WatchResult<NodeEvent> {
    let id = entry.node.ok_or_else(|| {
        WatchError::structure(format!(
            "{} entry without node: {}",
            entry.op,
            entry.path().display()
        ))
    })?;

    match state.tree.info(id).cloned() {
        Some(info) => {
            if entry.path().as_path() == info.path() {
                state.remove_node(id)?;
                Ok(NodeEvent {
                    op: entry.op,
                    info,
                    node: None,
                    before_path: None,
                })
            } else {
                Ok(NodeEvent {
                    op: entry.op,
                    info,
                    node: Some(id),
                    before_path: None,
                })
            }
        }
        // already gone: a parent's removal cascaded over it earlier in
        // this drain; report it from the enqueue-time snapshot
        None => {
            let info = entry.snapshot.clone().ok_or_else(|| {
                WatchError::structure(format!(
                    "{} entry without snapshot: {}",
                    entry.op,
                    entry.path().display()
                ))
            })?;
            Ok(NodeEvent {
                op: entry.op,
                info,
                node: None,
                before_path: None,
            })
        }
    }
}

/// Writes on known files only feed the write tracker. A write on a path
/// never mirrored is a create we missed.
fn write_branch(state: &mut State, entry: &QueueEntry) -> WatchResult<Option<NodeEvent>> {
    if let Some(id) = entry.node {
        if let Some(info) = state.tree.info(id).cloned() {
            if !info.is_dir() {
                state.writes.insert(info.ino(), id);
            }
            return Ok(None);
        }
    }

    let fi = meta::stat(&entry.path())?;
    let id = state.create_add_node(fi.path())?;
    let info = state
        .tree
        .info(id)
        .cloned()
        .ok_or_else(|| WatchError::structure("created node missing from tree"))?;

    Ok(Some(NodeEvent {
        op: Op::CREATE,
        info,
        node: Some(id),
        before_path: None,
    }))
}

/// Fold an assembled event into the batch. Events for the same inode merge:
/// a create paired with a remove/rename keeps the surviving side's node and
/// records the other side's path as `before_path`.
fn merge(batch: &mut Vec<NodeEvent>, incoming: NodeEvent, entry_path: &Path) {
    let ino = incoming.info.ino();
    let Some(idx) = batch.iter().position(|e| e.info.ino() == ino) else {
        batch.push(incoming);
        return;
    };

    let existing = &batch[idx];
    let op = existing.op | incoming.op;

    let merged = if existing.op.contains(Op::CREATE)
        && incoming.op.intersects(Op::REMOVE | Op::RENAME)
    {
        NodeEvent {
            op,
            info: existing.info.clone(),
            node: existing.node,
            before_path: Some(entry_path.to_path_buf()),
        }
    } else if existing.op.intersects(Op::REMOVE | Op::RENAME) && incoming.op.contains(Op::CREATE) {
        NodeEvent {
            op,
            before_path: Some(existing.info.path().to_path_buf()),
            info: incoming.info,
            node: incoming.node,
        }
    } else {
        NodeEvent {
            op,
            before_path: incoming.before_path.or_else(|| existing.before_path.clone()),
            node: incoming.node.or(existing.node),
            info: incoming.info,
        }
    };

    batch[idx] = merged;
}

/// A create and a disappearance of the same inode in one drain is a move.
fn update_op(batch: &mut [NodeEvent]) {
    for ne in batch {
        if ne.op.contains(Op::CREATE) && ne.op.intersects(Op::REMOVE | Op::RENAME) {
            ne.op = Op::MOVE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::{NullBackend, RawEvent};
    use std::fs::{self, File};
    use tempfile::TempDir;

    fn ready_state(tmp: &TempDir) -> State {
        let mut state =
            State::new(meta::stat(tmp.path()).unwrap(), Box::new(NullBackend)).unwrap();
        let root = state.tree.root();
        state.append_nodes(root).unwrap();
        state
    }

    fn raw(state: &mut State, op: Op, path: PathBuf) {
        state.enqueue_raw(&RawEvent { op, path });
    }

    #[test]
    fn deep_mkdir_emits_creates_in_depth_order() {
        let tmp = TempDir::new().unwrap();
        let mut state = ready_state(&tmp);

        fs::create_dir_all(tmp.path().join("opt/etc/httpd")).unwrap();
        // the watcher only sees the first level appear
        raw(&mut state, Op::CREATE, tmp.path().join("opt"));

        let events = drain(&mut state);
        let paths: Vec<_> = events.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            [
                tmp.path().join("opt"),
                tmp.path().join("opt/etc"),
                tmp.path().join("opt/etc/httpd"),
            ]
        );
        assert!(events.iter().all(|e| e.op == Op::CREATE && e.is_dir));
        assert!(state.find_node(&tmp.path().join("opt/etc/httpd")).is_some());
    }

    #[test]
    fn rename_within_batch_becomes_move_create_first() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();
        File::create(tmp.path().join("b/f.txt")).unwrap();

        let mut state = ready_state(&tmp);
        let ino = state
            .find_info(&tmp.path().join("b/f.txt"))
            .unwrap()
            .ino();

        // move b/f.txt -> a/f.txt; the create side sorts first (a < b)
        fs::rename(tmp.path().join("b/f.txt"), tmp.path().join("a/f.txt")).unwrap();
        raw(&mut state, Op::RENAME, tmp.path().join("b/f.txt"));
        raw(&mut state, Op::CREATE, tmp.path().join("a/f.txt"));

        let events = drain(&mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Op::MOVE);
        assert_eq!(events[0].path, tmp.path().join("a/f.txt"));
        assert_eq!(
            events[0].before_path.as_deref(),
            Some(tmp.path().join("b/f.txt").as_path())
        );
        assert_eq!(state.find_info(&tmp.path().join("a/f.txt")).unwrap().ino(), ino);
        assert!(state.find_node(&tmp.path().join("b/f.txt")).is_none());
    }

    #[test]
    fn rename_within_batch_becomes_move_rename_first() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();
        File::create(tmp.path().join("a/f.txt")).unwrap();

        let mut state = ready_state(&tmp);

        // move a/f.txt -> b/f.txt; the rename side sorts first (a < b)
        fs::rename(tmp.path().join("a/f.txt"), tmp.path().join("b/f.txt")).unwrap();
        raw(&mut state, Op::RENAME, tmp.path().join("a/f.txt"));
        raw(&mut state, Op::CREATE, tmp.path().join("b/f.txt"));

        let events = drain(&mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Op::MOVE);
        assert_eq!(events[0].path, tmp.path().join("b/f.txt"));
        assert_eq!(
            events[0].before_path.as_deref(),
            Some(tmp.path().join("a/f.txt").as_path())
        );
    }

    #[test]
    fn directory_move_keeps_children_mirrored() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("usr/local/etc")).unwrap();
        File::create(tmp.path().join("usr/local/etc/httpd.conf")).unwrap();

        let mut state = ready_state(&tmp);

        fs::rename(tmp.path().join("usr/local/etc"), tmp.path().join("usr/etc")).unwrap();
        raw(&mut state, Op::CREATE, tmp.path().join("usr/etc"));
        raw(&mut state, Op::RENAME, tmp.path().join("usr/local/etc"));

        let events = drain(&mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Op::MOVE);
        assert_eq!(events[0].path, tmp.path().join("usr/etc"));
        assert_eq!(
            events[0].before_path.as_deref(),
            Some(tmp.path().join("usr/local/etc").as_path())
        );

        let conf = state
            .find_info(&tmp.path().join("usr/etc/httpd.conf"))
            .unwrap();
        assert_eq!(conf.dir(), tmp.path().join("usr/etc").as_path());
    }

    #[test]
    fn removal_cascade_reports_children() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("opt/etc/httpd")).unwrap();
        File::create(tmp.path().join("opt/etc/httpd/httpd.conf")).unwrap();

        let mut state = ready_state(&tmp);

        fs::remove_dir_all(tmp.path().join("opt/etc/httpd")).unwrap();
        raw(&mut state, Op::REMOVE, tmp.path().join("opt/etc/httpd/httpd.conf"));
        raw(&mut state, Op::REMOVE, tmp.path().join("opt/etc/httpd"));

        let events = drain(&mut state);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].op, Op::REMOVE);
        assert_eq!(events[0].path, tmp.path().join("opt/etc/httpd"));
        assert_eq!(events[1].op, Op::REMOVE);
        assert_eq!(events[1].path, tmp.path().join("opt/etc/httpd/httpd.conf"));

        assert!(state.find_node(&tmp.path().join("opt/etc/httpd")).is_none());
        assert!(state.find_node(&tmp.path().join("opt/etc")).is_some());
    }

    #[test]
    fn write_on_known_file_feeds_tracker_silently() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"data").unwrap();

        let mut state = ready_state(&tmp);
        raw(&mut state, Op::WRITE, tmp.path().join("a.txt"));

        let events = drain(&mut state);
        assert!(events.is_empty());
        assert!(!state.writes.is_empty());
    }

    #[test]
    fn write_on_unknown_path_promotes_to_create() {
        let tmp = TempDir::new().unwrap();
        let mut state = ready_state(&tmp);

        fs::write(tmp.path().join("late.txt"), b"data").unwrap();
        raw(&mut state, Op::WRITE, tmp.path().join("late.txt"));

        let events = drain(&mut state);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].op, Op::CREATE);
        assert_eq!(events[0].path, tmp.path().join("late.txt"));
        assert!(!state.writes.is_empty());
    }

    #[test]
    fn chmod_produces_nothing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"data").unwrap();

        let mut state = ready_state(&tmp);
        raw(&mut state, Op::CHMOD, tmp.path().join("a.txt"));

        assert!(drain(&mut state).is_empty());
        assert!(state.writes.is_empty());
    }

    #[test]
    fn create_of_vanished_path_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let mut state = ready_state(&tmp);

        raw(&mut state, Op::CREATE, tmp.path().join("ghost"));
        assert!(drain(&mut state).is_empty());
    }

    #[test]
    fn create_events_register_with_tracker() {
        let tmp = TempDir::new().unwrap();
        let mut state = ready_state(&tmp);

        fs::write(tmp.path().join("fresh.txt"), b"payload").unwrap();
        raw(&mut state, Op::CREATE, tmp.path().join("fresh.txt"));

        let events = drain(&mut state);
        assert_eq!(events.len(), 1);
        assert!(!state.writes.is_empty());
    }
}
