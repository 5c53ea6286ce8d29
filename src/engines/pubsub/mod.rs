//! PubSub engine: topic trie with MQTT-style wildcards and retained values
//! (spec.md §4.6).

mod engine;
mod trie;
mod types;

pub use engine::{CMD_SNAPSHOT, PubSubEngine};
pub use types::{CMD_DISCONNECT_CLIENT, CMD_PUBLISH, CMD_SUBSCRIBE, CMD_UNSUBSCRIBE};

use std::path::PathBuf;

use tokio::sync::watch;

use crate::engines::EngineHandle;

/// Boot (replaying any persisted retained values under `root`) and spawn the
/// PubSub engine task, returning its handle.
pub async fn spawn(root: Option<PathBuf>, shutdown: watch::Receiver<bool>) -> anyhow::Result<EngineHandle> {
    let (tx, rx) = crate::engines::mailbox();
    let engine = PubSubEngine::boot(root).await?;
    tokio::spawn(engine.run(rx, shutdown));
    Ok(EngineHandle::new(tx))
}
