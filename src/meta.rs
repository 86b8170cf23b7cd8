//! File metadata snapshots and path helpers.
//!
//! Everything the engine knows about a filesystem entity is captured in a
//! [`FileInfo`] at stat time; nothing else in the crate touches `std::fs`
//! metadata directly.

use crate::error::{WatchError, WatchResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Immutable metadata snapshot for one filesystem entity.
///
/// `path` is always `dir` joined with `name`. Inode 0 is reserved for
/// "unknown" and never appears in a snapshot produced by [`stat`].
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    name: String,
    dir: PathBuf,
    path: PathBuf,
    size: u64,
    mtime: SystemTime,
    ino: u64,
    is_dir: bool,
}

impl FileInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> SystemTime {
        self.mtime
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }
}

/// Stat `path` without following symlinks.
///
/// Symlinks are mirrored as plain entries and never descended into.
pub fn stat(path: &Path) -> WatchResult<FileInfo> {
    let md = fs::symlink_metadata(path).map_err(|e| WatchError::metadata(path, e))?;
    let mtime = md.modified().map_err(|e| WatchError::metadata(path, e))?;
    let (dir, name) = split(path)?;

    Ok(FileInfo {
        name,
        dir,
        path: path.to_path_buf(),
        size: md.len(),
        mtime,
        ino: inode(&md, path),
        is_dir: md.is_dir(),
    })
}

#[cfg(unix)]
fn inode(md: &fs::Metadata, _path: &Path) -> u64 {
    use std::os::unix::fs::MetadataExt;
    md.ino()
}

/// On platforms without inode numbers a stable 64-bit hash of the absolute
/// path stands in for the inode, so identity tracking across renames is
/// unavailable there. The result is clamped away from the reserved value 0.
#[cfg(not(unix))]
fn inode(_md: &fs::Metadata, path: &Path) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish().max(1)
}

/// List a directory, statting each entry. Entries that vanish between the
/// listing and the stat are skipped.
pub fn read_dir(path: &Path) -> WatchResult<Vec<FileInfo>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(path).map_err(|e| WatchError::metadata(path, e))? {
        let entry = entry.map_err(|e| WatchError::metadata(path, e))?;
        match stat(&entry.path()) {
            Ok(info) => entries.push(info),
            Err(e) => debug!(error = %e, "directory entry vanished during listing"),
        }
    }

    Ok(entries)
}

/// Split a path into its parent directory and final component.
pub fn split(path: &Path) -> WatchResult<(PathBuf, String)> {
    let dir = path
        .parent()
        .ok_or_else(|| WatchError::structure(format!("path has no parent: {}", path.display())))?;
    let base = path
        .file_name()
        .ok_or_else(|| WatchError::structure(format!("path has no base name: {}", path.display())))?;

    Ok((dir.to_path_buf(), base.to_string_lossy().into_owned()))
}

/// Components of `path` relative to `base`. Empty when `path` is not under
/// `base`. The controller passes the watched root's parent directory as
/// `base`, so the first component is the root's own name.
pub fn split_path(path: &Path, base: &Path) -> Vec<String> {
    match path.strip_prefix(base) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
