//! Inode-keyed lookups: the reachability index and the write tracker.

use crate::error::{WatchError, WatchResult};
use crate::meta::FileInfo;
use crate::node::NodeId;
use std::collections::HashMap;

/// Map from inode to arena node.
///
/// Every node reachable from the root is indexed here; renames are detected
/// by looking the inode of a freshly created path up in this map. Inode 0
/// is reserved and rejected.
#[derive(Debug, Default)]
pub(crate) struct InoIndex {
    nodes: HashMap<u64, NodeId>,
}

impl InoIndex {
    pub(crate) fn get(&self, ino: u64) -> Option<NodeId> {
        if ino == 0 {
            return None;
        }
        self.nodes.get(&ino).copied()
    }

    pub(crate) fn insert(&mut self, info: &FileInfo, id: NodeId) -> WatchResult<()> {
        if info.ino() == 0 {
            return Err(WatchError::InvalidInode(info.path().to_path_buf()));
        }
        self.nodes.insert(info.ino(), id);
        Ok(())
    }

    pub(crate) fn remove(&mut self, ino: u64) -> Option<NodeId> {
        self.nodes.remove(&ino)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Files observed as writing, keyed by inode.
///
/// The controller polls these on the fast tick and emits `WRITE_COMPLETE`
/// once size and mtime hold still.
#[derive(Debug, Default)]
pub(crate) struct WriteTracker {
    nodes: HashMap<u64, NodeId>,
}

impl WriteTracker {
    pub(crate) fn insert(&mut self, ino: u64, id: NodeId) {
        if ino != 0 {
            self.nodes.insert(ino, id);
        }
    }

    pub(crate) fn remove(&mut self, ino: u64) {
        self.nodes.remove(&ino);
    }

    pub(crate) fn entries(&self) -> Vec<(u64, NodeId)> {
        self.nodes.iter().map(|(k, v)| (*k, *v)).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
