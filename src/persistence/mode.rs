//! Persistence mode: how a durable unit (queue, stream partition, pubsub
//! retained-value store) treats its append-only log. Three modes per
//! spec.md §4.7.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// No disk writes; data is lost on restart.
    #[default]
    Memory,
    /// Every mutating op is written and fsync'd before the reply returns.
    FileSync,
    /// Writes accumulate in an OS-buffered segment; flushed on a timer or
    /// once the buffered record count crosses a threshold.
    FileAsync,
}

impl PersistenceMode {
    pub fn is_durable(self) -> bool {
        !matches!(self, PersistenceMode::Memory)
    }
}
