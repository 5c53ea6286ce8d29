//! End-to-end Stream scenarios driven over the real TCP wire protocol.

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use nexo::engines::stream::{CMD_CREATE, CMD_FETCH, CMD_JOIN, CMD_PUBLISH};
use nexo::protocol::request::EngineTag;
use nexo::protocol::wire::{get_bytes, get_varint, put_bytes, put_optional_u64, put_string, put_varint};

const PORT_BASE: u16 = 46000;

fn encode_create(topic: &str, partitions: u32) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, topic);
    put_optional_u64(&mut buf, Some(partitions as u64));
    put_optional_u64(&mut buf, None);
    put_optional_u64(&mut buf, None);
    put_string(&mut buf, "");
    buf.freeze()
}

fn encode_publish(topic: &str, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, topic);
    put_bytes(&mut buf, payload);
    buf.freeze()
}

fn encode_join(topic: &str, group: &str, client_id: &str) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, topic);
    put_string(&mut buf, group);
    put_string(&mut buf, client_id);
    buf.freeze()
}

fn encode_fetch(topic: &str, group: &str, generation_id: u64, partition: u32, from_offset: u64, limit: u32) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, topic);
    put_string(&mut buf, group);
    put_varint(&mut buf, generation_id);
    put_varint(&mut buf, partition as u64);
    put_varint(&mut buf, from_offset);
    put_varint(&mut buf, limit as u64);
    buf.freeze()
}

struct Assignment {
    generation_id: u64,
    partitions: Vec<u32>,
}

fn decode_join_reply(mut buf: Bytes) -> Assignment {
    let generation_id = get_varint(&mut buf).unwrap();
    let count = get_varint(&mut buf).unwrap();
    let partitions = (0..count).map(|_| get_varint(&mut buf).unwrap() as u32).collect();
    Assignment { generation_id, partitions }
}

struct Record {
    #[allow(dead_code)]
    offset: u64,
    payload: Vec<u8>,
}

fn decode_fetch_reply(mut buf: Bytes) -> Vec<Record> {
    let count = get_varint(&mut buf).unwrap();
    (0..count)
        .map(|_| {
            let offset = get_varint(&mut buf).unwrap();
            let _ts_ms = buf.get_i64();
            let payload = get_bytes(&mut buf).unwrap();
            Record { offset, payload }
        })
        .collect()
}

fn seq_of(payload: &[u8]) -> u64 {
    let text = std::str::from_utf8(payload).unwrap();
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    value["seq"].as_u64().unwrap()
}

#[tokio::test]
async fn stream_delivers_records_in_publish_order() {
    let port = common::spawn_broker(PORT_BASE).await;
    let mut client = common::Client::connect(port).await;

    client
        .call(EngineTag::Stream, CMD_CREATE, encode_create("basic-order-test", 1))
        .await
        .expect("create topic");

    for seq in 1..=3u64 {
        client
            .call(EngineTag::Stream, CMD_PUBLISH, encode_publish("basic-order-test", format!("{{\"seq\":{seq}}}").as_bytes()))
            .await
            .expect("publish record");
    }

    let join_reply = client
        .call(EngineTag::Stream, CMD_JOIN, encode_join("basic-order-test", "g1", "c1"))
        .await
        .expect("join group");
    let assignment = decode_join_reply(join_reply);
    assert_eq!(assignment.partitions, vec![0]);

    let fetch_reply = client
        .call(EngineTag::Stream, CMD_FETCH, encode_fetch("basic-order-test", "g1", assignment.generation_id, 0, 0, 10))
        .await
        .expect("fetch records");
    let records = decode_fetch_reply(fetch_reply);
    let seqs: Vec<u64> = records.iter().map(|r| seq_of(&r.payload)).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[tokio::test]
async fn stream_rebalance_preserves_full_id_coverage() {
    let port = common::spawn_broker(PORT_BASE).await;
    let mut client_a = common::Client::connect(port).await;
    let mut client_b = common::Client::connect(port).await;

    client_a
        .call(EngineTag::Stream, CMD_CREATE, encode_create("integrity-test", 4))
        .await
        .expect("create topic");

    let join_a = client_a
        .call(EngineTag::Stream, CMD_JOIN, encode_join("integrity-test", "g-integrity", "consumer-a"))
        .await
        .expect("consumer-a joins");
    let mut assignment_a = decode_join_reply(join_a);
    assert_eq!(assignment_a.partitions, vec![0, 1, 2, 3]);

    for id in 0..25u64 {
        client_a
            .call(EngineTag::Stream, CMD_PUBLISH, encode_publish("integrity-test", format!("{{\"seq\":{id}}}").as_bytes()))
            .await
            .expect("publish record");
    }

    let join_b = client_b
        .call(EngineTag::Stream, CMD_JOIN, encode_join("integrity-test", "g-integrity", "consumer-b"))
        .await
        .expect("consumer-b joins");
    let assignment_b = decode_join_reply(join_b);

    // consumer-a's own JOIN also broadcasts a push (its initial, single-member
    // assignment) before consumer-b ever joins, so the first frame or two read
    // here may just echo that. Keep reading until a strictly newer generation
    // shows up — that's the reassignment triggered by consumer-b's join.
    let starting_generation = assignment_a.generation_id;
    loop {
        let (_, push_body) = client_a
            .next_push(Duration::from_secs(2))
            .await
            .expect("consumer-a receives a rebalance push");
        let candidate = decode_join_reply(push_body);
        if candidate.generation_id > starting_generation {
            assignment_a = candidate;
            break;
        }
    }

    for id in 25..50u64 {
        client_a
            .call(EngineTag::Stream, CMD_PUBLISH, encode_publish("integrity-test", format!("{{\"seq\":{id}}}").as_bytes()))
            .await
            .expect("publish record");
    }

    let mut seen = BTreeSet::new();
    for partition in &assignment_a.partitions {
        let reply = client_a
            .call(EngineTag::Stream, CMD_FETCH, encode_fetch("integrity-test", "g-integrity", assignment_a.generation_id, *partition, 0, 64))
            .await
            .expect("consumer-a fetch");
        for record in decode_fetch_reply(reply) {
            seen.insert(seq_of(&record.payload));
        }
    }
    for partition in &assignment_b.partitions {
        let reply = client_b
            .call(EngineTag::Stream, CMD_FETCH, encode_fetch("integrity-test", "g-integrity", assignment_b.generation_id, *partition, 0, 64))
            .await
            .expect("consumer-b fetch");
        for record in decode_fetch_reply(reply) {
            seen.insert(seq_of(&record.payload));
        }
    }

    let expected: BTreeSet<u64> = (0..50).collect();
    assert_eq!(seen, expected);
}
