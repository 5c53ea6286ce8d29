//! Per-connection task: one reader loop decoding length-delimited frames,
//! one writer task draining a shared outbound channel fed by every in-flight
//! request plus any later push deliveries (spec.md §4.1, §5).
//!
//! Grounded on the teacher's split read/write halves for its graceful-
//! shutdown-aware axum listener (`api::server::ApiServer`), generalized from
//! "HTTP connection, one task" to "raw TCP frame loop, reader task spawns a
//! detached dispatch per request so replies may complete out of order".

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use crate::core::constants::DEFAULT_DELIVERY_CHANNEL_CAPACITY;
use crate::engines::Engines;
use crate::protocol::request::decode_envelope;

use super::dispatcher::{ConnectionState, cleanup_connection, dispatch};

pub async fn handle(socket: TcpStream, engines: Engines, mut shutdown: watch::Receiver<bool>) {
    let framed = Framed::new(socket, LengthDelimitedCodec::new());
    let (sink, mut stream) = framed.split();

    let (out_tx, out_rx) = mpsc::channel::<Bytes>(DEFAULT_DELIVERY_CHANNEL_CAPACITY);
    let writer = tokio::spawn(write_loop(sink, out_rx));
    let state = std::sync::Arc::new(parking_lot::Mutex::new(ConnectionState::default()));

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            maybe_frame = stream.next() => {
                match maybe_frame {
                    Some(Ok(frame)) => {
                        let Ok(envelope) = decode_envelope(frame.freeze()) else {
                            debug!("closing connection on malformed frame");
                            break;
                        };
                        let engines = engines.clone();
                        let out_tx = out_tx.clone();
                        let state = state.clone();
                        tokio::spawn(async move {
                            dispatch(envelope, &engines, out_tx, &state).await;
                        });
                    }
                    _ => break,
                }
            }
        }
    }

    // `out_tx` may still be cloned inside the engines themselves (a live
    // Stream `JOIN` or PubSub `SUBSCRIBE` holds one for future pushes), so
    // the writer can't be awaited until those are torn down — otherwise it
    // would block forever waiting for senders that only disappear once
    // `cleanup_connection` issues the matching `LEAVE`/disconnect.
    drop(out_tx);
    cleanup_connection(&engines, &state).await;
    let _ = writer.await;
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    while let Some(frame) = rx.recv().await {
        if sink.send(frame).await.is_err() {
            break;
        }
    }
}
