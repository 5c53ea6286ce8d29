//! End-to-end Queue scenarios driven over the real TCP wire protocol.

mod common;

use bytes::{Buf, Bytes, BytesMut};
use nexo::engines::queue::{CMD_ACK, CMD_CONSUME, CMD_CREATE, CMD_NACK, CMD_PUSH, CMD_SNAPSHOT};
use nexo::protocol::request::EngineTag;
use nexo::protocol::wire::{get_bytes, get_string, get_varint, put_bytes, put_optional_string, put_optional_u64, put_string, put_varint};

const PORT_BASE: u16 = 45000;

fn encode_create(name: &str, visibility_timeout_ms: Option<u64>, max_retries: Option<u64>) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, name);
    put_optional_u64(&mut buf, visibility_timeout_ms);
    put_optional_u64(&mut buf, max_retries);
    put_optional_u64(&mut buf, None);
    put_optional_u64(&mut buf, None);
    put_optional_u64(&mut buf, None);
    put_string(&mut buf, "");
    buf.freeze()
}

fn encode_push(name: &str, payload: &[u8], priority: u8) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, name);
    put_bytes(&mut buf, payload);
    buf.put_u8(priority);
    put_optional_u64(&mut buf, None);
    buf.freeze()
}

fn encode_consume(name: &str, batch_size: u32, wait_ms: u64) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, name);
    put_varint(&mut buf, batch_size as u64);
    put_varint(&mut buf, wait_ms);
    buf.freeze()
}

fn encode_ack(name: &str, handle: u64) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, name);
    put_varint(&mut buf, handle);
    buf.freeze()
}

fn encode_nack(name: &str, handle: u64, reason: &str) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, name);
    put_varint(&mut buf, handle);
    put_optional_string(&mut buf, Some(reason));
    buf.freeze()
}

struct Delivered {
    handle: u64,
    payload: Vec<u8>,
    #[allow(dead_code)]
    attempts: u64,
    #[allow(dead_code)]
    priority: u8,
}

fn decode_consume_reply(mut buf: Bytes) -> Vec<Delivered> {
    let count = get_varint(&mut buf).unwrap();
    (0..count)
        .map(|_| {
            let handle = get_varint(&mut buf).unwrap();
            let payload = get_bytes(&mut buf).unwrap();
            let attempts = get_varint(&mut buf).unwrap();
            let priority = buf.get_u8();
            Delivered { handle, payload, attempts, priority }
        })
        .collect()
}

fn find_queue_row(mut buf: Bytes, name: &str) -> Option<(u64, u64, u64)> {
    let count = get_varint(&mut buf).unwrap();
    for _ in 0..count {
        let row_name = get_string(&mut buf).unwrap();
        let pending = get_varint(&mut buf).unwrap();
        let inflight = get_varint(&mut buf).unwrap();
        let scheduled = get_varint(&mut buf).unwrap();
        let _dlq = get_varint(&mut buf).unwrap();
        let _created_at_ms = buf.get_i64();
        let _pushed = get_varint(&mut buf).unwrap();
        let _acked = get_varint(&mut buf).unwrap();
        let _dead_lettered = get_varint(&mut buf).unwrap();
        if row_name == name {
            return Some((pending, inflight, scheduled));
        }
    }
    None
}

#[tokio::test]
async fn queue_lifecycle_push_consume_ack() {
    let port = common::spawn_broker(PORT_BASE).await;
    let mut client = common::Client::connect(port).await;

    client
        .call(EngineTag::Queue, CMD_CREATE, encode_create("lifecycle_test", None, None))
        .await
        .expect("create queue");

    client
        .call(EngineTag::Queue, CMD_PUSH, encode_push("lifecycle_test", br#"{"msg":"lifecycle"}"#, 0))
        .await
        .expect("push message");

    let reply = client
        .call(EngineTag::Queue, CMD_CONSUME, encode_consume("lifecycle_test", 1, 2000))
        .await
        .expect("consume message");
    let delivered = decode_consume_reply(reply);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].payload, br#"{"msg":"lifecycle"}"#);

    client
        .call(EngineTag::Queue, CMD_ACK, encode_ack("lifecycle_test", delivered[0].handle))
        .await
        .expect("ack message");

    let snapshot = client.call(EngineTag::Queue, CMD_SNAPSHOT, Bytes::new()).await.expect("snapshot");
    let (pending, inflight, _scheduled) = find_queue_row(snapshot, "lifecycle_test").expect("queue in snapshot");
    assert_eq!(pending, 0);
    assert_eq!(inflight, 0);
}

#[tokio::test]
async fn queue_priority_orders_high_before_low() {
    let port = common::spawn_broker(PORT_BASE).await;
    let mut client = common::Client::connect(port).await;

    client
        .call(EngineTag::Queue, CMD_CREATE, encode_create("priority_test", None, None))
        .await
        .expect("create queue");

    for (payload, priority) in [(b"low".as_slice(), 0u8), (b"medium".as_slice(), 10), (b"high".as_slice(), 255)] {
        client
            .call(EngineTag::Queue, CMD_PUSH, encode_push("priority_test", payload, priority))
            .await
            .expect("push message");
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        let reply = client
            .call(EngineTag::Queue, CMD_CONSUME, encode_consume("priority_test", 1, 2000))
            .await
            .expect("consume message");
        let mut delivered = decode_consume_reply(reply);
        received.push(String::from_utf8(delivered.remove(0).payload).unwrap());
    }

    assert_eq!(received, vec!["high", "medium", "low"]);
}

#[tokio::test]
async fn queue_exhausted_retries_land_in_dlq() {
    let port = common::spawn_broker(PORT_BASE).await;
    let mut client = common::Client::connect(port).await;

    client
        .call(EngineTag::Queue, CMD_CREATE, encode_create("dlq_test_queue", Some(100), Some(2)))
        .await
        .expect("create queue");

    client
        .call(EngineTag::Queue, CMD_PUSH, encode_push("dlq_test_queue", b"fail-me", 0))
        .await
        .expect("push message");

    // Two failed deliveries exhaust max_retries=2; the second nack promotes
    // the message into the DLQ synchronously, before this call's reply.
    for _ in 0..2 {
        let reply = client
            .call(EngineTag::Queue, CMD_CONSUME, encode_consume("dlq_test_queue", 1, 2000))
            .await
            .expect("consume message");
        let delivered = decode_consume_reply(reply);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].payload, b"fail-me");
        client
            .call(EngineTag::Queue, CMD_NACK, encode_nack("dlq_test_queue", delivered[0].handle, "handler threw"))
            .await
            .expect("nack message");
    }

    let snapshot = client.call(EngineTag::Queue, CMD_SNAPSHOT, Bytes::new()).await.expect("snapshot");
    let (pending, inflight, scheduled) = find_queue_row(snapshot, "dlq_test_queue").expect("queue in snapshot");
    assert_eq!((pending, inflight, scheduled), (0, 0, 0));

    let dlq_reply = client
        .call(EngineTag::Queue, CMD_CONSUME, encode_consume("dlq_test_queue_dlq", 1, 2000))
        .await
        .expect("consume dlq");
    let dead = decode_consume_reply(dlq_reply);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, b"fail-me");

    let empty = client
        .call(EngineTag::Queue, CMD_CONSUME, encode_consume("dlq_test_queue_dlq", 1, 200))
        .await
        .expect("dlq is drained");
    assert!(decode_consume_reply(empty).is_empty());
}
