//! Store engine: a flat key-value map with optional per-key TTL
//! (spec.md §4.3).

mod engine;
mod types;

pub use engine::{CMD_SNAPSHOT, StoreEngine};
pub use types::{CMD_DEL, CMD_GET, CMD_SET};

use tokio::sync::watch;

use crate::engines::EngineHandle;

/// Spawn the Store engine task and return its handle.
pub fn spawn(shutdown: watch::Receiver<bool>) -> EngineHandle {
    let (tx, rx) = crate::engines::mailbox();
    let engine = StoreEngine::new();
    tokio::spawn(engine.run(rx, shutdown));
    EngineHandle::new(tx)
}
