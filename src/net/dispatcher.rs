//! Stateless routing from a decoded [`RequestEnvelope`] to the owning
//! engine's mailbox, plus the bookkeeping needed to clean up a connection's
//! transient Stream/PubSub subscriptions on disconnect (spec.md §4.2, §5).

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::engines::pubsub::CMD_SUBSCRIBE;
use crate::engines::stream::CMD_JOIN;
use crate::engines::{EngineHandle, Engines};
use crate::error::{BrokerError, Result};
use crate::protocol::request::{EngineTag, RequestEnvelope};
use crate::protocol::response::{Status, encode_response};
use crate::protocol::wire::{get_string, put_string};

/// Everything a connection must remember in order to undo its transient
/// subscriptions when it disconnects: every Stream group it joined (fed back
/// as an explicit `LEAVE`) and every distinct PubSub client id it used to
/// subscribe (fed back as `CMD_DISCONNECT_CLIENT`).
#[derive(Default)]
pub struct ConnectionState {
    stream_joins: Vec<(String, String, String)>,
    pubsub_clients: HashSet<String>,
}

pub type SharedConnectionState = Arc<Mutex<ConnectionState>>;

fn engine_handle(engines: &Engines, tag: EngineTag) -> Result<&EngineHandle> {
    match tag {
        EngineTag::Store => Ok(&engines.store),
        EngineTag::Queue => Ok(&engines.queue),
        EngineTag::Stream => Ok(&engines.stream),
        EngineTag::PubSub => Ok(&engines.pubsub),
        EngineTag::Admin => Err(BrokerError::InvalidArgument("admin is not reachable over the wire protocol".into())),
    }
}

/// `JOIN`'s payload is `(topic, group, client_id)`; peek those fields
/// without touching the copy the engine call already consumed.
fn parse_stream_join(payload: &Bytes) -> Option<(String, String, String)> {
    let mut buf = payload.clone();
    let topic = get_string(&mut buf).ok()?;
    let group = get_string(&mut buf).ok()?;
    let client_id = get_string(&mut buf).ok()?;
    Some((topic, group, client_id))
}

/// `SUBSCRIBE`'s payload is `(client_id, pattern)`.
fn parse_pubsub_subscribe(payload: &Bytes) -> Option<String> {
    let mut buf = payload.clone();
    get_string(&mut buf).ok()
}

fn encode_leave(topic: &str, group: &str, client_id: &str) -> Bytes {
    let mut buf = bytes::BytesMut::new();
    put_string(&mut buf, topic);
    put_string(&mut buf, group);
    put_string(&mut buf, client_id);
    buf.freeze()
}

fn encode_disconnect(client_id: &str) -> Bytes {
    let mut buf = bytes::BytesMut::new();
    put_string(&mut buf, client_id);
    buf.freeze()
}

/// Dispatch one decoded request, writing its reply (or error) onto
/// `out_tx`. Requests that establish a push subscription (Stream `JOIN`,
/// PubSub `SUBSCRIBE`) hand the connection's outbound sender to the engine
/// and record the subscription in `state` for disconnect cleanup.
pub async fn dispatch(envelope: RequestEnvelope, engines: &Engines, out_tx: mpsc::Sender<Bytes>, state: &SharedConnectionState) {
    let RequestEnvelope { request_id, engine, command, payload } = envelope;

    let handle = match engine_handle(engines, engine) {
        Ok(handle) => handle,
        Err(err) => {
            let _ = out_tx.send(encode_response(request_id, Status::Err(err), &[])).await;
            return;
        }
    };

    let establishes_push = (engine == EngineTag::Stream && command == CMD_JOIN) || (engine == EngineTag::PubSub && command == CMD_SUBSCRIBE);
    let push_sender = if establishes_push { Some(out_tx.clone()) } else { None };

    match handle.call(command, payload.clone(), push_sender).await {
        Ok(reply_payload) => {
            if engine == EngineTag::Stream && command == CMD_JOIN {
                if let Some(join) = parse_stream_join(&payload) {
                    state.lock().stream_joins.push(join);
                }
            }
            if engine == EngineTag::PubSub && command == CMD_SUBSCRIBE {
                if let Some(client_id) = parse_pubsub_subscribe(&payload) {
                    state.lock().pubsub_clients.insert(client_id);
                }
            }
            let _ = out_tx.send(encode_response(request_id, Status::Ok, &reply_payload)).await;
        }
        Err(err) => {
            let _ = out_tx.send(encode_response(request_id, Status::Err(err), &[])).await;
        }
    }
}

/// Undo every transient subscription this connection established: explicit
/// `LEAVE`s for Stream group memberships, one `CMD_DISCONNECT_CLIENT` per
/// distinct PubSub client id.
pub async fn cleanup_connection(engines: &Engines, state: &SharedConnectionState) {
    let (stream_joins, pubsub_clients) = {
        let mut guard = state.lock();
        (std::mem::take(&mut guard.stream_joins), std::mem::take(&mut guard.pubsub_clients))
    };

    for (topic, group, client_id) in stream_joins {
        let payload = encode_leave(&topic, &group, &client_id);
        let _ = engines.stream.call(crate::engines::stream::CMD_LEAVE, payload, None).await;
    }
    for client_id in pubsub_clients {
        let payload = encode_disconnect(&client_id);
        let _ = engines.pubsub.call(crate::engines::pubsub::CMD_DISCONNECT_CLIENT, payload, None).await;
    }
}
