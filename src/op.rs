//! Operation flags carried by queue entries and emitted events.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Operation bits attached to raw notifications and emitted events.
    ///
    /// The five low bits mirror what the OS watcher can report. `MOVE` and
    /// `WRITE_COMPLETE` are never accepted as input: `MOVE` is synthesized
    /// when one drain sees both halves of a rename for the same inode, and
    /// `WRITE_COMPLETE` when a tracked file's size and mtime hold still
    /// across polls. Both appear alone in emitted events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Op: u32 {
        const CREATE = 1;
        const REMOVE = 1 << 1;
        const RENAME = 1 << 2;
        const WRITE = 1 << 3;
        const CHMOD = 1 << 4;
        const MOVE = 1 << 5;
        const WRITE_COMPLETE = 1 << 6;
    }
}

impl Op {
    /// True when the target may still be receiving writes: anything except
    /// removals and metadata-only changes.
    pub fn is_writable(self) -> bool {
        !self.intersects(Op::REMOVE | Op::CHMOD)
    }

    /// Collapse raw notification bits to the single bit a queue entry
    /// carries. Precedence: Write > Create > Remove > Rename > Chmod.
    pub(crate) fn queued(self) -> Option<Op> {
        [Op::WRITE, Op::CREATE, Op::REMOVE, Op::RENAME, Op::CHMOD]
            .into_iter()
            .find(|&op| self.contains(op))
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Op, &str); 7] = [
            (Op::CREATE, "Create"),
            (Op::REMOVE, "Remove"),
            (Op::RENAME, "Rename"),
            (Op::WRITE, "Write"),
            (Op::CHMOD, "Chmod"),
            (Op::MOVE, "Move"),
            (Op::WRITE_COMPLETE, "WriteComplete"),
        ];

        let mut first = true;
        for (op, name) in NAMES {
            if self.contains(op) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        if first {
            f.write_str("(none)")?;
        }

        Ok(())
    }
}
