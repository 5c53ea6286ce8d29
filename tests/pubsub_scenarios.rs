//! End-to-end PubSub scenarios driven over the real TCP wire protocol.

mod common;

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use nexo::engines::pubsub::{CMD_PUBLISH, CMD_SUBSCRIBE};
use nexo::protocol::request::EngineTag;
use nexo::protocol::wire::{get_bytes, get_string, put_bytes, put_string};

const PORT_BASE: u16 = 47000;

fn encode_subscribe(client_id: &str, pattern: &str) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, client_id);
    put_string(&mut buf, pattern);
    buf.freeze()
}

fn encode_publish(topic: &str, payload: &[u8], retain: bool) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, topic);
    put_bytes(&mut buf, payload);
    buf.put_u8(retain as u8);
    buf.freeze()
}

fn decode_delivery(mut buf: Bytes) -> (String, Vec<u8>) {
    let topic = get_string(&mut buf).unwrap();
    let payload = get_bytes(&mut buf).unwrap();
    (topic, payload)
}

#[tokio::test]
async fn wildcard_subscriber_receives_live_publish() {
    let port = common::spawn_broker(PORT_BASE).await;
    let mut subscriber = common::Client::connect(port).await;
    let mut publisher = common::Client::connect(port).await;

    subscriber
        .call(EngineTag::PubSub, CMD_SUBSCRIBE, encode_subscribe("watcher", "home/+/light"))
        .await
        .expect("subscribe to wildcard pattern");

    publisher
        .call(EngineTag::PubSub, CMD_PUBLISH, encode_publish("home/kitchen/light", b"ON", true))
        .await
        .expect("publish retained value");

    let (_, body) = subscriber
        .next_push(Duration::from_secs(2))
        .await
        .expect("wildcard subscriber receives the live publish");
    let (topic, payload) = decode_delivery(body);
    assert_eq!(topic, "home/kitchen/light");
    assert_eq!(payload, b"ON");
}

#[tokio::test]
async fn late_subscriber_receives_retained_value_before_ack() {
    let port = common::spawn_broker(PORT_BASE).await;
    let mut publisher = common::Client::connect(port).await;
    let mut late_subscriber = common::Client::connect(port).await;

    publisher
        .call(EngineTag::PubSub, CMD_PUBLISH, encode_publish("home/kitchen/light", b"ON", true))
        .await
        .expect("publish retained value before anyone subscribes");

    // The retained replay is pushed onto the connection before the SUBSCRIBE
    // ack returns, so by the time `call` completes it is already buffered.
    late_subscriber
        .call(EngineTag::PubSub, CMD_SUBSCRIBE, encode_subscribe("latecomer", "home/kitchen/light"))
        .await
        .expect("subscribe to exact topic");

    let (_, body) = late_subscriber
        .next_push(Duration::from_millis(200))
        .await
        .expect("late subscriber gets the retained replay");
    let (topic, payload) = decode_delivery(body);
    assert_eq!(topic, "home/kitchen/light");
    assert_eq!(payload, b"ON");
}
