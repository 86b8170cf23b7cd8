//! Mutable engine state: tree, index, queue, and write tracker.
//!
//! Everything here is owned by the controller and mutated under its lock.
//! The methods mirror the coalescer's needs: attach/detach nodes while
//! keeping the inode index and the OS-watch registrations in step with the
//! tree.

use crate::error::{WatchError, WatchResult};
use crate::event::Event;
use crate::index::{InoIndex, WriteTracker};
use crate::meta::{self, FileInfo};
use crate::node::{NodeId, Tree};
use crate::op::Op;
use crate::queue::{EventQueue, QueueEntry};
use crate::watch::{RawEvent, WatchBackend};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub(crate) struct State {
    pub(crate) tree: Tree,
    pub(crate) index: InoIndex,
    pub(crate) queue: EventQueue,
    pub(crate) writes: WriteTracker,
    backend: Option<Box<dyn WatchBackend>>,
    base: PathBuf,
}

impl State {
    /// Build the state around a freshly statted root, indexing and
    /// registering the root directory.
    pub(crate) fn new(info: FileInfo, backend: Box<dyn WatchBackend>) -> WatchResult<State> {
        let base = info.dir().to_path_buf();
        let tree = Tree::new(info);
        let mut state = State {
            tree,
            index: InoIndex::default(),
            queue: EventQueue::default(),
            writes: WriteTracker::default(),
            backend: Some(backend),
            base,
        };

        let root = state.tree.root();
        state.add_node(root)?;
        Ok(state)
    }

    /// Drop the backend, which stops raw event delivery.
    pub(crate) fn close(&mut self) {
        self.backend = None;
    }

    /// Index a node and, for directories, register it with the backend.
    /// Registration failure is not fatal: the subtree stays consistent
    /// through the drift sweep.
    pub(crate) fn add_node(&mut self, id: NodeId) -> WatchResult<()> {
        let info = self
            .tree
            .info(id)
            .ok_or_else(|| WatchError::structure("indexing a node not in the tree"))?
            .clone();
        self.index.insert(&info, id)?;

        if info.is_dir() {
            if let Some(backend) = self.backend.as_mut() {
                if let Err(e) = backend.watch_dir(info.path()) {
                    warn!(
                        path = %info.path().display(),
                        error = %e,
                        "watch registration failed; relying on drift sweep"
                    );
                }
            }
        }

        Ok(())
    }

    /// Resolve the parent of `path` in the tree, attach a new child for it,
    /// and index it.
    pub(crate) fn create_add_node(&mut self, path: &Path) -> WatchResult<NodeId> {
        let comps = meta::split_path(path, &self.base);
        if comps.is_empty() {
            return Err(WatchError::structure(format!(
                "path outside watched root: {}",
                path.display()
            )));
        }

        let (parent, exact) = self
            .tree
            .find(&comps[..comps.len() - 1])
            .ok_or_else(|| WatchError::NotFound(path.to_path_buf()))?;
        if !exact {
            return Err(WatchError::NotFound(path.to_path_buf()));
        }

        let name = &comps[comps.len() - 1];
        let id = self
            .tree
            .create_child(parent, name)
            .ok_or_else(|| WatchError::structure(format!("cannot attach {}", path.display())))?;
        self.add_node(id)?;

        Ok(id)
    }

    /// Recursively mirror the contents of the directory node `id`,
    /// indexing and registering everything found.
    pub(crate) fn append_nodes(&mut self, id: NodeId) -> WatchResult<()> {
        let dir_path = self
            .tree
            .info(id)
            .ok_or_else(|| WatchError::structure("scan of node not in tree"))?
            .path()
            .to_path_buf();

        for entry in meta::read_dir(&dir_path)? {
            let child = self.create_add_node(entry.path())?;
            if self.tree.info(child).map(|i| i.is_dir()).unwrap_or(false) {
                self.append_nodes(child)?;
            }
        }

        Ok(())
    }

    /// Rehome a mirrored node to `dir`/`name`, fixing watch registrations
    /// for every directory that moved with it.
    pub(crate) fn rename_node(&mut self, id: NodeId, dir: &Path, name: &str) -> WatchResult<()> {
        let info = self
            .tree
            .info(id)
            .ok_or_else(|| WatchError::structure("rename of node not in tree"))?;
        if info.ino() == 0 {
            return Err(WatchError::InvalidInode(info.path().to_path_buf()));
        }

        let parent = self
            .find_node(dir)
            .ok_or_else(|| WatchError::NotFound(dir.to_path_buf()))?;
        let (dir_nodes, old_dirs) = self.tree.rename(id, name, parent)?;

        for old in &old_dirs {
            if let Some(backend) = self.backend.as_mut() {
                if let Err(e) = backend.unwatch_dir(old) {
                    // the path may already be gone; registration follows below
                    debug!(path = %old.display(), error = %e, "unwatch failed after rename");
                }
            }
        }
        for node in dir_nodes {
            self.add_node(node)?;
        }

        Ok(())
    }

    /// Remove a mirrored node and its subtree from tree, index, and
    /// watch registrations.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> WatchResult<()> {
        let info = self
            .tree
            .info(id)
            .ok_or_else(|| WatchError::structure("remove of node not in tree"))?;
        if info.ino() == 0 {
            return Err(WatchError::InvalidInode(info.path().to_path_buf()));
        }

        for removed in self.tree.remove(id)? {
            self.index.remove(removed.ino());
            if removed.is_dir() {
                if let Some(backend) = self.backend.as_mut() {
                    if let Err(e) = backend.unwatch_dir(removed.path()) {
                        debug!(
                            path = %removed.path().display(),
                            error = %e,
                            "unwatch failed for removed directory"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Translate and enqueue one raw notification. Unknown op bits and
    /// unsplittable paths are dropped with a log line.
    pub(crate) fn enqueue_raw(&mut self, raw: &RawEvent) {
        let Some(op) = raw.op.queued() else {
            debug!(path = %raw.path.display(), op = %raw.op, "raw event without input bits");
            return;
        };
        let (dir, base) = match meta::split(&raw.path) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(path = %raw.path.display(), error = %e, "unsplittable raw path");
                return;
            }
        };

        let node = self.find_node(&raw.path);
        let snapshot = node.and_then(|id| self.tree.info(id).cloned());
        self.queue.push(QueueEntry {
            op,
            dir,
            base,
            node,
            snapshot,
        });
    }

    /// Enqueue synthesized entries bound to existing nodes, then sort.
    /// Used for freshly scanned subtrees and by the drift sweep.
    pub(crate) fn enqueue_from_nodes(&mut self, ids: &[NodeId], op: Op) {
        for &id in ids {
            if let Some(info) = self.tree.info(id) {
                self.queue.push(QueueEntry {
                    op,
                    dir: info.dir().to_path_buf(),
                    base: info.name().to_string(),
                    node: Some(id),
                    snapshot: Some(info.clone()),
                });
            }
        }
        self.queue.sort();
    }

    /// Exact-path lookup in the tree.
    pub(crate) fn find_node(&self, path: &Path) -> Option<NodeId> {
        let comps = meta::split_path(path, &self.base);
        if comps.is_empty() {
            return None;
        }
        match self.tree.find(&comps) {
            Some((id, true)) => Some(id),
            _ => None,
        }
    }

    /// Metadata snapshot for an exact path.
    pub(crate) fn find_info(&self, path: &Path) -> WatchResult<FileInfo> {
        self.find_node(path)
            .and_then(|id| self.tree.info(id).cloned())
            .ok_or_else(|| WatchError::NotFound(path.to_path_buf()))
    }

    /// Poll every tracked file once. A file whose size and mtime match the
    /// previous observation is finished: it leaves the tracker and, when
    /// non-empty, yields a `WRITE_COMPLETE` event. Files that vanished
    /// leave the tracker silently.
    pub(crate) fn check_write_complete(&mut self) -> Vec<Event> {
        if self.writes.is_empty() {
            return Vec::new();
        }

        let mut done = Vec::new();

        for (ino, id) in self.writes.entries() {
            let Some(prev) = self.tree.info(id).cloned() else {
                self.writes.remove(ino);
                continue;
            };

            match self.tree.stat_refresh(id) {
                Err(_) => self.writes.remove(ino),
                Ok(cur) => {
                    if cur.size() == prev.size() && cur.mtime() == prev.mtime() && cur.size() > 0 {
                        self.writes.remove(ino);
                        done.push(Event::from_info(Op::WRITE_COMPLETE, &cur, None));
                    }
                }
            }
        }

        done
    }
}
