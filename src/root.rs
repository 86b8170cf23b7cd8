//! Root controller: owns the mirrored tree and runs the watch loop.
//!
//! Three things feed the loop: raw notifications from the backend, the
//! fast drain tick, and the slow sweep tick. All state mutation is
//! serialized under one mutex, never held across an await; emitted events
//! go out on a bounded channel whose backpressure is the consumer's.

use crate::coalesce;
use crate::config::WatchConfig;
use crate::error::{WatchError, WatchResult};
use crate::event::Event;
use crate::meta::{self, FileInfo};
use crate::state::State;
use crate::sweep;
use crate::watch::{NotifyBackend, RawEvent, WatchBackend};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::debug;

/// Controller for one watched directory tree.
pub struct Root {
    state: Arc<Mutex<State>>,
    config: WatchConfig,
    raw_rx: Option<mpsc::Receiver<RawEvent>>,
}

impl Root {
    /// Build a controller over the OS notification backend. Only the first
    /// of `dirs` is mirrored.
    pub fn new(dirs: &[PathBuf], config: WatchConfig) -> WatchResult<Root> {
        let (raw_tx, raw_rx) = mpsc::channel(config.raw_capacity);
        let backend = NotifyBackend::new(raw_tx)?;
        let refs: Vec<&Path> = dirs.iter().map(PathBuf::as_path).collect();
        Self::with_backend(&refs, config, Box::new(backend), raw_rx)
    }

    /// Build a controller over a custom backend; raw events arrive on
    /// `raw_rx`. This is the seam for alternative notification sources.
    pub fn with_backend(
        dirs: &[&Path],
        config: WatchConfig,
        backend: Box<dyn WatchBackend>,
        raw_rx: mpsc::Receiver<RawEvent>,
    ) -> WatchResult<Root> {
        let dir = dirs
            .first()
            .ok_or_else(|| WatchError::structure("no directory to watch"))?;
        let dir = dir
            .canonicalize()
            .map_err(|e| WatchError::metadata(*dir, e))?;
        let info = meta::stat(&dir)?;
        let state = State::new(info, backend)?;

        Ok(Root {
            state: Arc::new(Mutex::new(state)),
            config,
            raw_rx: Some(raw_rx),
        })
    }

    /// Initial recursive scan: mirror every entry under the root and
    /// register every directory with the backend.
    pub fn build_tree(&self) -> WatchResult<()> {
        let mut state = self.lock();
        let root = state.tree.root();
        state.append_nodes(root)
    }

    /// Start the background loop and hand back the event stream. The loop
    /// runs until [`close`](Self::close) drops the backend (which ends raw
    /// delivery) or the receiver is dropped.
    pub fn watch(&mut self) -> WatchResult<mpsc::Receiver<Event>> {
        let mut raw_rx = self.raw_rx.take().ok_or(WatchError::AlreadyWatching)?;
        let (event_tx, event_rx) = mpsc::channel(self.config.event_capacity);
        let state = Arc::clone(&self.state);
        let drain_every = self.config.drain_interval;
        let sweep_every = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut drain_tick = interval_at(Instant::now() + drain_every, drain_every);
            let mut sweep_tick = interval_at(Instant::now() + sweep_every, sweep_every);

            loop {
                tokio::select! {
                    maybe_raw = raw_rx.recv() => match maybe_raw {
                        Some(raw) => {
                            lock_state(&state).enqueue_raw(&raw);
                        }
                        None => {
                            debug!("raw channel closed; watch loop exiting");
                            break;
                        }
                    },
                    _ = drain_tick.tick() => {
                        let (completed, drained) = {
                            let mut st = lock_state(&state);
                            // observe every enqueue that happened before
                            // this tick, then drain once
                            while let Ok(raw) = raw_rx.try_recv() {
                                st.enqueue_raw(&raw);
                            }
                            let completed = st.check_write_complete();
                            let drained = coalesce::drain(&mut st);
                            (completed, drained)
                        };
                        for event in completed.into_iter().chain(drained) {
                            if event_tx.send(event).await.is_err() {
                                debug!("event receiver dropped; watch loop exiting");
                                return;
                            }
                        }
                    },
                    _ = sweep_tick.tick() => {
                        sweep::sweep(&mut lock_state(&state));
                    },
                }
            }
        });

        Ok(event_rx)
    }

    /// Tear down the OS watcher. Raw delivery stops, after which the
    /// background loop exits on its own.
    pub fn close(&self) {
        self.lock().close();
    }

    /// Metadata snapshot for an exact path under the root.
    pub fn find(&self, path: &Path) -> WatchResult<FileInfo> {
        self.lock().find_info(path)
    }

    /// Metadata snapshot for a mirrored inode.
    pub fn find_by_inode(&self, ino: u64) -> Option<FileInfo> {
        let state = self.lock();
        state
            .index
            .get(ino)
            .and_then(|id| state.tree.info(id))
            .cloned()
    }

    /// Pre-order traversal over every mirrored entry.
    pub fn walk<F: FnMut(&FileInfo)>(&self, mut f: F) {
        let state = self.lock();
        let root = state.tree.root();
        state.tree.walk(root, &mut f);
    }

    /// Indented rendering of the mirrored tree, for diagnostics.
    pub fn print_tree(&self) -> String {
        self.lock().tree.render()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        lock_state(&self.state)
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock_state(state: &Arc<Mutex<State>>) -> std::sync::MutexGuard<'_, State> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
