//! Stream engine: partitioned append log with generation-fenced consumer
//! groups (spec.md §4.5).

mod coordinator;
mod engine;
mod types;

pub use engine::{CMD_ADMIN_MESSAGES, CMD_SNAPSHOT, StreamEngine};
pub use types::{CMD_COMMIT, CMD_CREATE, CMD_DELETE, CMD_FETCH, CMD_JOIN, CMD_LEAVE, CMD_PUBLISH};

use std::path::PathBuf;

use tokio::sync::watch;

use crate::engines::EngineHandle;

/// Boot (replaying any persisted topics under `root`) and spawn the Stream
/// engine task, returning its handle.
pub async fn spawn(root: Option<PathBuf>, shutdown: watch::Receiver<bool>) -> anyhow::Result<EngineHandle> {
    let (tx, rx) = crate::engines::mailbox();
    let engine = StreamEngine::boot(root).await?;
    tokio::spawn(engine.run(rx, shutdown));
    Ok(EngineHandle::new(tx))
}
