//! Queue engine: the hardest subsystem (spec.md §4.4) — priority+FIFO
//! pending heap, delay/retry scheduled heap, lease-based in-flight table,
//! and a lazily-created dead-letter queue per named queue.

mod engine;
mod state;
mod types;

pub use engine::{CMD_ADMIN_MESSAGES, CMD_SNAPSHOT, QueueEngine};
pub use types::{CMD_ACK, CMD_CONSUME, CMD_CREATE, CMD_DELETE, CMD_EXISTS, CMD_NACK, CMD_PUSH};

use std::path::PathBuf;

use tokio::sync::watch;

use crate::engines::EngineHandle;

/// Boot (replaying any persisted queues under `root`) and spawn the Queue
/// engine task, returning its handle.
pub async fn spawn(root: Option<PathBuf>, shutdown: watch::Receiver<bool>) -> anyhow::Result<EngineHandle> {
    let (tx, rx) = crate::engines::mailbox();
    let engine = QueueEngine::boot(root).await?;
    tokio::spawn(engine.run(rx, shutdown));
    Ok(EngineHandle::new(tx))
}
