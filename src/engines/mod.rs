//! Shared engine plumbing: every engine (Store, Queue, Stream, PubSub) runs
//! on its own dedicated task, owns its state exclusively, and is reached
//! only through a bounded mailbox carrying typed [`EngineRequest`]s with a
//! one-shot reply channel — generalized from the teacher's
//! `Publisher`/`Subscriber` mpsc+oneshot pattern in `data::topics::mod` from
//! "one topic" to "one engine per wire-protocol tag".

pub mod pubsub;
pub mod queue;
pub mod store;
pub mod stream;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::core::constants::DEFAULT_ENGINE_MAILBOX_CAPACITY;
use crate::error::{BrokerError, Result};

/// One decoded-but-not-yet-dispatched command, handed from a connection task
/// (or the admin HTTP surface) to an engine's mailbox.
pub struct EngineRequest {
    pub command: u8,
    pub payload: Bytes,
    /// The connection's outbound frame sender. Commands that establish a
    /// push subscription (PubSub `SUBSCRIBE`, Stream `JOIN`) clone this and
    /// keep it so later deliveries can be pushed without going back through
    /// the dispatcher.
    pub push_sender: Option<mpsc::Sender<Bytes>>,
    pub reply: oneshot::Sender<Result<Bytes>>,
}

/// Handle to an engine's mailbox, held by the dispatcher and the admin HTTP
/// surface. Cloning is cheap (an `mpsc::Sender` clone), matching every
/// connection being able to reach every engine independently.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<EngineRequest>) -> Self {
        Self { tx }
    }

    /// Send a command and await its reply. Applies back-pressure by
    /// blocking on `send` when the engine's mailbox is full (spec.md §4.1) —
    /// never drops a request silently.
    pub async fn call(
        &self,
        command: u8,
        payload: Bytes,
        push_sender: Option<mpsc::Sender<Bytes>>,
    ) -> Result<Bytes> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest {
                command,
                payload,
                push_sender,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BrokerError::Internal)?;
        reply_rx.await.map_err(BrokerError::from)?
    }
}

pub fn mailbox() -> (mpsc::Sender<EngineRequest>, mpsc::Receiver<EngineRequest>) {
    mpsc::channel(DEFAULT_ENGINE_MAILBOX_CAPACITY)
}

/// Bundle of mailbox handles for all four engines plus the admin tag,
/// threaded through the dispatcher and the admin HTTP router. Modeled on
/// the teacher's `ServerContext`-style single immutable bundle passed to
/// spawned tasks instead of module-level singletons (SPEC_FULL.md §9).
#[derive(Clone)]
pub struct Engines {
    pub store: EngineHandle,
    pub queue: EngineHandle,
    pub stream: EngineHandle,
    pub pubsub: EngineHandle,
}
