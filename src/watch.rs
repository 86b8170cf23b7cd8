//! Raw notification backends.
//!
//! The engine tracks subdirectories itself, so backends are registered one
//! directory at a time (never recursively). Delivery happens out-of-band:
//! the backend pushes [`RawEvent`]s into the channel handed to it at
//! construction, and the controller loop consumes the receiving half.

use crate::error::WatchResult;
use crate::op::Op;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::warn;

/// One low-level notification from the OS watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Subset of the five input bits (`CREATE`, `REMOVE`, `RENAME`,
    /// `WRITE`, `CHMOD`).
    pub op: Op,
    pub path: PathBuf,
}

/// Registration surface the controller drives as directories appear and
/// disappear.
pub trait WatchBackend: Send {
    fn watch_dir(&mut self, path: &Path) -> WatchResult<()>;
    fn unwatch_dir(&mut self, path: &Path) -> WatchResult<()>;
}

/// `notify`-backed implementation of [`WatchBackend`].
pub struct NotifyBackend {
    watcher: RecommendedWatcher,
}

impl NotifyBackend {
    /// Build a watcher that translates notify events and pushes them into
    /// `tx`. Watcher errors are logged and never fatal.
    pub fn new(tx: mpsc::Sender<RawEvent>) -> WatchResult<Self> {
        let watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for raw in translate(&event) {
                        // a dropped receiver means the engine is closing
                        let _ = tx.blocking_send(raw);
                    }
                }
                Err(e) => warn!(error = %e, "raw watcher error"),
            },
            Config::default(),
        )?;

        Ok(Self { watcher })
    }
}

impl WatchBackend for NotifyBackend {
    fn watch_dir(&mut self, path: &Path) -> WatchResult<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    fn unwatch_dir(&mut self, path: &Path) -> WatchResult<()> {
        self.watcher.unwatch(path)?;
        Ok(())
    }
}

/// Backend that registers nothing. A tree driven by it is kept consistent
/// by the drift sweep alone: the degenerate case of a failed watcher
/// registration, and the workhorse of deterministic tests.
#[derive(Debug, Default)]
pub struct NullBackend;

impl WatchBackend for NullBackend {
    fn watch_dir(&mut self, _path: &Path) -> WatchResult<()> {
        Ok(())
    }

    fn unwatch_dir(&mut self, _path: &Path) -> WatchResult<()> {
        Ok(())
    }
}

/// Map a notify event onto raw input bits, one [`RawEvent`] per affected
/// path. Ambiguous renames are resolved with an existence probe.
fn translate(event: &notify::Event) -> Vec<RawEvent> {
    let mut out = Vec::new();

    match &event.kind {
        EventKind::Create(_) => push_all(&mut out, event, Op::CREATE),
        EventKind::Remove(_) => push_all(&mut out, event, Op::REMOVE),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => push_all(&mut out, event, Op::RENAME),
            RenameMode::To => push_all(&mut out, event, Op::CREATE),
            RenameMode::Both => {
                if let [from, to] = event.paths.as_slice() {
                    out.push(RawEvent {
                        op: Op::RENAME,
                        path: from.clone(),
                    });
                    out.push(RawEvent {
                        op: Op::CREATE,
                        path: to.clone(),
                    });
                }
            }
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    let op = if path.exists() { Op::CREATE } else { Op::RENAME };
                    out.push(RawEvent {
                        op,
                        path: path.clone(),
                    });
                }
            }
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => push_all(&mut out, event, Op::CHMOD),
        EventKind::Modify(_) => push_all(&mut out, event, Op::WRITE),
        _ => {}
    }

    out
}

fn push_all(out: &mut Vec<RawEvent>, event: &notify::Event, op: Op) {
    for path in &event.paths {
        out.push(RawEvent {
            op,
            path: path.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> notify::Event {
        let mut ev = notify::Event::new(kind);
        for p in paths {
            ev = ev.add_path(PathBuf::from(p));
        }
        ev
    }

    #[test]
    fn create_remove_and_write_map_directly() {
        let out = translate(&event(EventKind::Create(CreateKind::File), &["/w/a"]));
        assert_eq!(out, [RawEvent { op: Op::CREATE, path: "/w/a".into() }]);

        let out = translate(&event(EventKind::Remove(RemoveKind::Folder), &["/w/d"]));
        assert_eq!(out[0].op, Op::REMOVE);

        let out = translate(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            &["/w/a"],
        ));
        assert_eq!(out[0].op, Op::WRITE);
    }

    #[test]
    fn metadata_changes_map_to_chmod() {
        let out = translate(&event(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/w/a"],
        ));
        assert_eq!(out[0].op, Op::CHMOD);
    }

    #[test]
    fn rename_both_splits_into_rename_and_create() {
        let out = translate(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/old", "/w/new"],
        ));
        assert_eq!(
            out,
            [
                RawEvent { op: Op::RENAME, path: "/w/old".into() },
                RawEvent { op: Op::CREATE, path: "/w/new".into() },
            ]
        );
    }

    #[test]
    fn access_events_are_dropped() {
        let out = translate(&event(
            EventKind::Access(notify::event::AccessKind::Any),
            &["/w/a"],
        ));
        assert!(out.is_empty());
    }
}
