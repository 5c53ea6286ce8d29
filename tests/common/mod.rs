//! Shared TCP test client: encodes request envelopes and decodes response /
//! push frames exactly as a real SDK would, talking to a broker spun up
//! in-process via `nexo::app::App`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use nexo::app::App;
use nexo::core::Cli;
use nexo::protocol::request::EngineTag;
use nexo::protocol::wire::{get_string, get_varint, put_varint};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Each integration test file passes its own non-overlapping base so
/// concurrently-running test binaries don't race to bind the same port.
pub async fn spawn_broker(port_base: u16) -> u16 {
    static NEXT_OFFSET: AtomicU16 = AtomicU16::new(0);
    let offset = NEXT_OFFSET.fetch_add(2, Ordering::SeqCst);
    let port = port_base + offset;
    let dashboard_port = port + 1;
    let cli = Cli {
        host: Some("127.0.0.1".to_string()),
        port: Some(port),
        dashboard_port: Some(dashboard_port),
        env: Some("prod".to_string()),
        queue_root: None,
        stream_root: None,
        pubsub_root: None,
    };
    let app = App::init(&cli).await.expect("broker init failed");
    tokio::spawn(app.start());
    port
}

pub struct Client {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    next_request_id: u64,
    pending_pushes: VecDeque<(u64, Bytes)>,
}

#[derive(Debug)]
pub struct RpcError {
    pub kind: String,
    pub message: String,
}

impl Client {
    pub async fn connect(port: u16) -> Self {
        let mut last_err = None;
        for _ in 0..100 {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => {
                    return Self {
                        framed: Framed::new(stream, LengthDelimitedCodec::new()),
                        next_request_id: 1,
                        pending_pushes: VecDeque::new(),
                    };
                }
                Err(err) => {
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
        panic!("failed to connect to broker on port {port}: {last_err:?}");
    }

    pub async fn call(&mut self, engine: EngineTag, command: u8, payload: Bytes) -> Result<Bytes, RpcError> {
        self.call_timeout(engine, command, payload, Duration::from_secs(5)).await
    }

    pub async fn call_timeout(
        &mut self,
        engine: EngineTag,
        command: u8,
        payload: Bytes,
        wait: Duration,
    ) -> Result<Bytes, RpcError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut frame = BytesMut::new();
        put_varint(&mut frame, request_id);
        frame.put_u8(engine.to_u8());
        frame.put_u8(command);
        frame.extend_from_slice(&payload);
        self.framed.send(frame.freeze()).await.expect("send frame");

        loop {
            let next = timeout(wait, self.framed.next())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for reply to request {request_id}"))
                .expect("connection closed before reply")
                .expect("frame decode error");
            let mut buf = next.freeze();
            let kind = buf.get_u8();
            if kind == 2 {
                let subscription_id = get_varint(&mut buf).expect("push frame missing subscription id");
                self.pending_pushes.push_back((subscription_id, buf));
                continue;
            }
            let reply_id = get_varint(&mut buf).expect("response frame missing request id");
            if reply_id != request_id {
                continue;
            }
            let status = buf.get_u8();
            if status == 0 {
                return Ok(buf);
            }
            let kind = get_string(&mut buf).expect("error frame missing kind");
            let message = get_string(&mut buf).expect("error frame missing message");
            return Err(RpcError { kind, message });
        }
    }

    /// Pulls the next push frame, from the backlog buffered during a prior
    /// `call` or fresh off the wire, waiting up to `wait`.
    pub async fn next_push(&mut self, wait: Duration) -> Option<(u64, Bytes)> {
        if let Some(front) = self.pending_pushes.pop_front() {
            return Some(front);
        }
        let frame = timeout(wait, self.framed.next()).await.ok()??.ok()?;
        let mut buf = frame.freeze();
        let kind = buf.get_u8();
        if kind != 2 {
            return None;
        }
        let subscription_id = get_varint(&mut buf).ok()?;
        Some((subscription_id, buf))
    }
}
