//! Directory-tree change notification with inode-aware event coalescing.
//!
//! The engine mirrors a watched directory tree in memory, consumes raw
//! create/remove/rename/write/chmod notifications, and coalesces them into
//! semantic events: a rename observed as independent halves becomes one
//! [`Op::MOVE`], and a file seen writing yields a deferred
//! [`Op::WRITE_COMPLETE`] once its size and mtime hold still across polls.
//! A periodic drift sweep rescans directories whose mtime changed to cover
//! notifications the OS watcher missed.
//!
//! ```no_run
//! use dirnotify::{Root, WatchConfig};
//! use std::path::PathBuf;
//!
//! # async fn run() -> dirnotify::WatchResult<()> {
//! let mut root = Root::new(&[PathBuf::from("/srv/data")], WatchConfig::default())?;
//! root.build_tree()?;
//! let mut events = root.watch()?;
//! while let Some(event) = events.recv().await {
//!     println!("{} {}", event.op, event.path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod coalesce;
mod index;
mod node;
mod queue;
mod state;
mod sweep;

pub mod config;
pub mod error;
pub mod event;
pub mod meta;
pub mod op;
pub mod root;
pub mod watch;

pub use config::WatchConfig;
pub use error::{WatchError, WatchResult};
pub use event::Event;
pub use meta::FileInfo;
pub use op::Op;
pub use root::Root;
pub use watch::{NotifyBackend, NullBackend, RawEvent, WatchBackend};
