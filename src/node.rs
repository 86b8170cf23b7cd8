//! Arena-backed mirror of the watched subtree.
//!
//! The tree owns every node; the rest of the crate refers to nodes through
//! opaque [`NodeId`] handles that never leave the crate. All structural
//! mutation goes through tree methods so parent links, child maps, and
//! arena slots stay consistent.

use crate::error::{WatchError, WatchResult};
use crate::meta::{self, FileInfo};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::debug;

/// Opaque handle to a node owned by the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u64);

#[derive(Debug)]
struct Node {
    info: FileInfo,
    parent: Option<NodeId>,
    dirs: HashMap<String, NodeId>,
    files: HashMap<String, NodeId>,
}

#[derive(Debug)]
pub(crate) struct Tree {
    nodes: HashMap<NodeId, Node>,
    root: NodeId,
    next: u64,
}

impl Tree {
    pub(crate) fn new(info: FileInfo) -> Tree {
        let root = NodeId(1);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            Node {
                info,
                parent: None,
                dirs: HashMap::new(),
                files: HashMap::new(),
            },
        );

        Tree {
            nodes,
            root,
            next: 2,
        }
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub(crate) fn info(&self, id: NodeId) -> Option<&FileInfo> {
        self.nodes.get(&id).map(|n| &n.info)
    }

    fn alloc(&mut self, info: FileInfo, parent: NodeId) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        self.nodes.insert(
            id,
            Node {
                info,
                parent: Some(parent),
                dirs: HashMap::new(),
                files: HashMap::new(),
            },
        );
        id
    }

    /// Descend from the root matching `comps`, directories first. Returns
    /// the deepest node reached and whether the full path matched. The
    /// first component names the root itself.
    pub(crate) fn find(&self, comps: &[String]) -> Option<(NodeId, bool)> {
        self.find_from(self.root, comps)
    }

    fn find_from(&self, id: NodeId, comps: &[String]) -> Option<(NodeId, bool)> {
        let node = self.nodes.get(&id)?;

        match comps {
            [] => None,
            [last] => Some((id, node.info.name() == last.as_str())),
            [_, next, ..] => match node.dirs.get(next).or_else(|| node.files.get(next)) {
                Some(&child) => self.find_from(child, &comps[1..]),
                None => Some((id, false)),
            },
        }
    }

    /// Stat `parent/name` and attach the result as a child. Returns `None`
    /// when the stat fails (entity already gone) or the parent is not a
    /// directory.
    pub(crate) fn create_child(&mut self, parent: NodeId, name: &str) -> Option<NodeId> {
        let parent_node = self.nodes.get(&parent)?;
        if !parent_node.info.is_dir() {
            debug!(parent = %parent_node.info.path().display(), "create_child on a non-directory");
            return None;
        }

        let path = parent_node.info.path().join(name);
        let info = match meta::stat(&path) {
            Ok(info) => info,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "stat failed for new child");
                return None;
            }
        };

        let is_dir = info.is_dir();
        let id = self.alloc(info, parent);
        let parent_node = self.nodes.get_mut(&parent)?;
        if is_dir {
            parent_node.dirs.insert(name.to_string(), id);
        } else {
            parent_node.files.insert(name.to_string(), id);
        }

        Some(id)
    }

    /// Detach `id` from its parent, reparent it under `new_parent` as
    /// `name`, restat it at the new location, and restat every descendant
    /// (their paths changed). Returns the rehomed directory nodes and the
    /// old directory paths so the controller can fix watch registrations.
    pub(crate) fn rename(
        &mut self,
        id: NodeId,
        name: &str,
        new_parent: NodeId,
    ) -> WatchResult<(Vec<NodeId>, Vec<PathBuf>)> {
        let (old_name, old_path, was_dir, parent) = {
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| WatchError::structure("rename target not in tree"))?;
            (
                node.info.name().to_string(),
                node.info.path().to_path_buf(),
                node.info.is_dir(),
                node.parent,
            )
        };
        let old_parent = parent.ok_or_else(|| WatchError::structure("cannot rename tree root"))?;

        let mut old_dirs = Vec::new();
        let mut dir_nodes = Vec::new();
        if was_dir {
            old_dirs.push(old_path);
        }

        self.detach(old_parent, &old_name, id);

        let new_dir = self
            .nodes
            .get(&new_parent)
            .ok_or_else(|| WatchError::structure("rename parent not in tree"))?
            .info
            .path()
            .to_path_buf();
        let info = meta::stat(&new_dir.join(name))?;
        let is_dir = info.is_dir();

        {
            let node = self
                .nodes
                .get_mut(&id)
                .ok_or_else(|| WatchError::structure("rename target not in tree"))?;
            node.parent = Some(new_parent);
            node.info = info;
        }

        if let Some(parent_node) = self.nodes.get_mut(&new_parent) {
            if is_dir {
                parent_node.dirs.insert(name.to_string(), id);
            } else {
                parent_node.files.insert(name.to_string(), id);
            }
        }
        if is_dir {
            dir_nodes.push(id);
        }

        let (nodes, dirs) = self.update_children(id)?;
        dir_nodes.extend(nodes);
        old_dirs.extend(dirs);

        Ok((dir_nodes, old_dirs))
    }

    /// Restat a node at its position under the current parent chain,
    /// then its descendants. Collects rehomed directories like `rename`.
    fn update_info(&mut self, id: NodeId) -> WatchResult<(Vec<NodeId>, Vec<PathBuf>)> {
        let (old_path, name, parent) = {
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| WatchError::structure("update of node not in tree"))?;
            (
                node.info.path().to_path_buf(),
                node.info.name().to_string(),
                node.parent,
            )
        };
        let parent = parent.ok_or_else(|| WatchError::structure("update of detached node"))?;
        let parent_path = self
            .nodes
            .get(&parent)
            .ok_or_else(|| WatchError::structure("update under missing parent"))?
            .info
            .path()
            .to_path_buf();

        let info = meta::stat(&parent_path.join(&name))?;
        let is_dir = info.is_dir();
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| WatchError::structure("update of node not in tree"))?
            .info = info;

        let (mut nodes, mut dirs) = self.update_children(id)?;
        if is_dir {
            nodes.push(id);
            dirs.push(old_path);
        }

        Ok((nodes, dirs))
    }

    fn update_children(&mut self, id: NodeId) -> WatchResult<(Vec<NodeId>, Vec<PathBuf>)> {
        let (file_ids, dir_ids): (Vec<NodeId>, Vec<NodeId>) = {
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| WatchError::structure("update of node not in tree"))?;
            (
                node.files.values().copied().collect(),
                node.dirs.values().copied().collect(),
            )
        };

        let mut nodes = Vec::new();
        let mut dirs = Vec::new();
        for file in file_ids {
            self.update_info(file)?;
        }
        for dir in dir_ids {
            let (n, d) = self.update_info(dir)?;
            nodes.extend(n);
            dirs.extend(d);
        }

        Ok((nodes, dirs))
    }

    /// Detach `id` from its parent and delete it and every descendant from
    /// the arena. Returns metadata snapshots of everything removed, the
    /// node itself first.
    pub(crate) fn remove(&mut self, id: NodeId) -> WatchResult<Vec<FileInfo>> {
        let (name, parent) = {
            let node = self
                .nodes
                .get(&id)
                .ok_or_else(|| WatchError::structure("remove target not in tree"))?;
            (node.info.name().to_string(), node.parent)
        };
        let parent = parent.ok_or_else(|| WatchError::structure("cannot remove tree root"))?;

        self.detach(parent, &name, id);

        let mut removed = Vec::new();
        self.collect_remove(id, &mut removed);
        Ok(removed)
    }

    fn detach(&mut self, parent: NodeId, name: &str, id: NodeId) {
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            if parent_node.dirs.get(name) == Some(&id) {
                parent_node.dirs.remove(name);
            } else if parent_node.files.get(name) == Some(&id) {
                parent_node.files.remove(name);
            }
        }
    }

    fn collect_remove(&mut self, id: NodeId, out: &mut Vec<FileInfo>) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        out.push(node.info);
        for file in node.files.values() {
            self.collect_remove(*file, out);
        }
        for dir in node.dirs.values() {
            self.collect_remove(*dir, out);
        }
    }

    /// Restat a node at its current path, refreshing the stored snapshot.
    pub(crate) fn stat_refresh(&mut self, id: NodeId) -> WatchResult<FileInfo> {
        let path = self
            .nodes
            .get(&id)
            .ok_or_else(|| WatchError::structure("refresh of node not in tree"))?
            .info
            .path()
            .to_path_buf();
        let info = meta::stat(&path)?;
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| WatchError::structure("refresh of node not in tree"))?
            .info = info.clone();

        Ok(info)
    }

    /// Every descendant of `id`, files before directories at each level.
    pub(crate) fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if let Some(node) = self.nodes.get(&id) {
            out.extend(node.files.values().copied());
            for dir in node.dirs.values() {
                out.push(*dir);
                out.extend(self.children(*dir));
            }
        }
        out
    }

    pub(crate) fn dir_children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        self.nodes
            .get(&id)
            .map(|n| n.dirs.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn file_children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        self.nodes
            .get(&id)
            .map(|n| n.files.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    }

    /// Pre-order traversal over metadata snapshots.
    pub(crate) fn walk<F: FnMut(&FileInfo)>(&self, id: NodeId, f: &mut F) {
        if let Some(node) = self.nodes.get(&id) {
            f(&node.info);
            for file in node.files.values() {
                self.walk(*file, f);
            }
            for dir in node.dirs.values() {
                self.walk(*dir, f);
            }
        }
    }

    /// Indented rendering of the tree, for diagnostics.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.root, 0, &mut out);
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        if let Some(node) = self.nodes.get(&id) {
            let marker = if node.info.is_dir() { "/" } else { "" };
            let _ = writeln!(
                out,
                "{:indent$}{}{} ino={}",
                "",
                node.info.name(),
                marker,
                node.info.ino(),
                indent = depth * 2
            );
            for file in node.files.values() {
                self.render_node(*file, depth + 1, out);
            }
            for dir in node.dirs.values() {
                self.render_node(*dir, depth + 1, out);
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_id(raw: u64) -> NodeId {
    NodeId(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::path::Path;
    use tempfile::TempDir;

    fn comps(path: &Path, base: &Path) -> Vec<String> {
        meta::split_path(path, base)
    }

    fn build(tmp: &TempDir) -> Tree {
        fs::create_dir_all(tmp.path().join("usr/bin")).unwrap();
        File::create(tmp.path().join("usr/bin/ls.exe")).unwrap();

        let mut tree = Tree::new(meta::stat(tmp.path()).unwrap());
        let root = tree.root();
        let usr = tree.create_child(root, "usr").unwrap();
        let bin = tree.create_child(usr, "bin").unwrap();
        tree.create_child(bin, "ls.exe").unwrap();
        tree
    }

    #[test]
    fn find_descends_to_exact_match() {
        let tmp = TempDir::new().unwrap();
        let tree = build(&tmp);
        let base = tmp.path().parent().unwrap();

        let target = tmp.path().join("usr/bin/ls.exe");
        let (id, exact) = tree.find(&comps(&target, base)).unwrap();
        assert!(exact);
        assert_eq!(tree.info(id).unwrap().path(), target.as_path());

        let missing = tmp.path().join("usr/bin/missing");
        let (deepest, exact) = tree.find(&comps(&missing, base)).unwrap();
        assert!(!exact);
        assert_eq!(tree.info(deepest).unwrap().name(), "bin");
    }

    #[test]
    fn create_child_fails_silently_on_missing_entity() {
        let tmp = TempDir::new().unwrap();
        let mut tree = build(&tmp);
        let root = tree.root();
        assert!(tree.create_child(root, "ghost").is_none());
    }

    #[test]
    fn rename_rehomes_node_and_descendants() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("usr/local/etc/httpd")).unwrap();
        File::create(tmp.path().join("usr/local/etc/httpd/httpd.conf")).unwrap();

        let mut tree = Tree::new(meta::stat(tmp.path()).unwrap());
        let root = tree.root();
        let usr = tree.create_child(root, "usr").unwrap();
        let local = tree.create_child(usr, "local").unwrap();
        let etc = tree.create_child(local, "etc").unwrap();
        let httpd = tree.create_child(etc, "httpd").unwrap();
        tree.create_child(httpd, "httpd.conf").unwrap();

        // move usr/local/etc -> usr/etc on disk, then in the tree
        let old = tmp.path().join("usr/local/etc");
        let new = tmp.path().join("usr/etc");
        fs::rename(&old, &new).unwrap();

        let (dir_nodes, old_dirs) = tree.rename(etc, "etc", usr).unwrap();
        assert!(old_dirs.contains(&old));
        assert!(old_dirs.contains(&old.join("httpd")));
        assert_eq!(dir_nodes.len(), 2); // etc and httpd

        assert_eq!(tree.info(etc).unwrap().path(), new.as_path());
        assert_eq!(
            tree.info(httpd).unwrap().path(),
            new.join("httpd").as_path()
        );

        let base = tmp.path().parent().unwrap();
        let conf = new.join("httpd/httpd.conf");
        let (id, exact) = tree.find(&comps(&conf, base)).unwrap();
        assert!(exact);
        assert_eq!(tree.info(id).unwrap().dir(), new.join("httpd").as_path());
    }

    #[test]
    fn remove_collects_subtree_and_frees_slots() {
        let tmp = TempDir::new().unwrap();
        let tree_root = tmp.path();
        fs::create_dir_all(tree_root.join("opt/etc")).unwrap();
        File::create(tree_root.join("opt/etc/a.conf")).unwrap();
        File::create(tree_root.join("opt/etc/b.conf")).unwrap();

        let mut tree = Tree::new(meta::stat(tree_root).unwrap());
        let root = tree.root();
        let opt = tree.create_child(root, "opt").unwrap();
        let etc = tree.create_child(opt, "etc").unwrap();
        tree.create_child(etc, "a.conf").unwrap();
        tree.create_child(etc, "b.conf").unwrap();

        let removed = tree.remove(opt).unwrap();
        assert_eq!(removed.len(), 4);
        assert_eq!(removed[0].name(), "opt");
        assert!(!tree.contains(opt));
        assert!(!tree.contains(etc));
        assert!(tree.dir_children(root).is_empty());
    }

    #[test]
    fn remove_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut tree = build(&tmp);
        let root = tree.root();
        assert!(matches!(
            tree.remove(root),
            Err(WatchError::Structure(_))
        ));
    }

    #[test]
    fn children_and_walk_cover_every_node() {
        let tmp = TempDir::new().unwrap();
        let tree = build(&tmp);
        let root = tree.root();

        assert_eq!(tree.children(root).len(), 3); // usr, bin, ls.exe

        let mut seen = Vec::new();
        tree.walk(root, &mut |info| seen.push(info.name().to_string()));
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], tree.info(root).unwrap().name());
    }
}
