//! Unified error type for the notification engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by tree, queue, and controller operations.
///
/// The background loop never returns these; it logs and moves to the next
/// queue entry. Synchronous operations (`build_tree`, `find`) propagate them.
#[derive(Error, Debug)]
pub enum WatchError {
    /// stat or readdir failed; the target is treated as gone
    #[error("metadata error for {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Attempt to index a node with the reserved inode 0
    #[error("invalid inode 0 for {}", .0.display())]
    InvalidInode(PathBuf),

    /// Tree shape violation (missing parent, unresolvable path)
    #[error("tree structure error: {0}")]
    Structure(String),

    /// No mirrored node for the given path
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// OS watcher error (creation or registration)
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// IO error outside metadata retrieval
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// `watch()` called while the background loop is already running
    #[error("already watching")]
    AlreadyWatching,
}

impl WatchError {
    /// Create a metadata error for a path.
    pub fn metadata(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Metadata {
            path: path.into(),
            source,
        }
    }

    /// Create a structure error.
    pub fn structure(msg: impl Into<String>) -> Self {
        Self::Structure(msg.into())
    }
}

/// Result type alias for engine operations.
pub type WatchResult<T> = Result<T, WatchError>;
