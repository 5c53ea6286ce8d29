//! PubSub wire commands and the persisted retained-value record shape
//! (spec.md §3, §4.6, §6).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{BrokerError, Result};
use crate::protocol::wire::{get_bytes, get_string, put_bytes, put_string, put_varint};

pub const CMD_SUBSCRIBE: u8 = 0;
pub const CMD_UNSUBSCRIBE: u8 = 1;
pub const CMD_PUBLISH: u8 = 2;

/// Internal, not a wire command: the net layer issues this on connection
/// close to drop every subscription the disconnecting client held, the
/// PubSub analogue of Stream's explicit `LEAVE`.
pub const CMD_DISCONNECT_CLIENT: u8 = 253;

pub enum Command {
    Subscribe { client_id: String, pattern: String },
    Unsubscribe { client_id: String, pattern: String },
    Publish { topic: String, payload: Vec<u8>, retain: bool },
    DisconnectClient { client_id: String },
}

impl Command {
    pub fn decode(command: u8, mut payload: Bytes) -> Result<Self> {
        match command {
            CMD_SUBSCRIBE => {
                let client_id = get_string(&mut payload)?;
                let pattern = get_string(&mut payload)?;
                Ok(Command::Subscribe { client_id, pattern })
            }
            CMD_UNSUBSCRIBE => {
                let client_id = get_string(&mut payload)?;
                let pattern = get_string(&mut payload)?;
                Ok(Command::Unsubscribe { client_id, pattern })
            }
            CMD_PUBLISH => {
                let topic = get_string(&mut payload)?;
                let payload_bytes = get_bytes(&mut payload)?;
                if !payload.has_remaining() {
                    return Err(BrokerError::InvalidArgument("missing retain flag".into()));
                }
                let retain = payload.get_u8() != 0;
                Ok(Command::Publish { topic, payload: payload_bytes, retain })
            }
            CMD_DISCONNECT_CLIENT => Ok(Command::DisconnectClient { client_id: get_string(&mut payload)? }),
            other => Err(BrokerError::InvalidArgument(format!("unknown pubsub command {other}"))),
        }
    }
}

pub fn encode_empty_reply() -> Bytes {
    Bytes::new()
}

/// Delivered to a subscriber as a push frame body: the topic that matched
/// plus the payload, so a client with several overlapping subscriptions can
/// tell which concrete topic fired.
pub fn encode_delivery(topic: &str, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, topic);
    put_bytes(&mut buf, payload);
    buf.freeze()
}

/// One record per retained-value mutation, persisted so retained state
/// survives a restart (spec.md §9 Open Questions: retained values are
/// durable even though ordinary deliveries are not). An empty `value`
/// records a clear.
pub struct RetainedRecord {
    pub path: String,
    pub value: Vec<u8>,
}

impl RetainedRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.path);
        put_bytes(&mut buf, &self.value);
        buf.to_vec()
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(raw);
        let path = get_string(&mut buf)?;
        let value = get_bytes(&mut buf)?;
        Ok(Self { path, value })
    }
}

/// Admin `/api/pubsub` row shape.
pub struct TopicRow {
    pub full_path: String,
    pub subscribers: u32,
    pub retained_value: Option<Vec<u8>>,
}

pub struct PubSubSnapshot {
    pub active_clients: u32,
    pub total_topics: u32,
    pub topics: Vec<TopicRow>,
    pub multi_level_wildcards: u32,
    pub single_level_wildcards: u32,
}

pub fn encode_snapshot(snapshot: &PubSubSnapshot) -> Bytes {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, snapshot.active_clients as u64);
    put_varint(&mut buf, snapshot.total_topics as u64);
    put_varint(&mut buf, snapshot.multi_level_wildcards as u64);
    put_varint(&mut buf, snapshot.single_level_wildcards as u64);
    put_varint(&mut buf, snapshot.topics.len() as u64);
    for row in &snapshot.topics {
        put_string(&mut buf, &row.full_path);
        put_varint(&mut buf, row.subscribers as u64);
        match &row.retained_value {
            Some(v) => {
                buf.put_u8(1);
                put_bytes(&mut buf, v);
            }
            None => buf.put_u8(0),
        }
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_command_roundtrips_with_retain_flag() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "home/kitchen/light");
        put_bytes(&mut buf, b"ON");
        buf.put_u8(1);
        match Command::decode(CMD_PUBLISH, buf.freeze()).unwrap() {
            Command::Publish { topic, payload, retain } => {
                assert_eq!(topic, "home/kitchen/light");
                assert_eq!(payload, b"ON");
                assert!(retain);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn retained_record_roundtrips() {
        let record = RetainedRecord { path: "home/kitchen/light".into(), value: b"ON".to_vec() };
        let decoded = RetainedRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.path, "home/kitchen/light");
        assert_eq!(decoded.value, b"ON");
    }
}
