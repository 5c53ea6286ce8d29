//! Queue wire commands, policy, and the persisted event record shape
//! (spec.md §3, §4.4, §6).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::core::constants::{
    DEFAULT_QUEUE_MAX_PAYLOAD_BYTES, DEFAULT_QUEUE_MAX_RETRIES, DEFAULT_QUEUE_VISIBILITY_TIMEOUT_MS,
};
use crate::error::{BrokerError, Result};
use crate::persistence::PersistenceMode;
use crate::protocol::wire::{
    get_bytes, get_optional_string, get_optional_u64, get_string, put_bytes, put_optional_string,
    put_optional_u64, put_string,
};

pub const CMD_CREATE: u8 = 0;
pub const CMD_DELETE: u8 = 1;
pub const CMD_EXISTS: u8 = 2;
pub const CMD_PUSH: u8 = 3;
pub const CMD_CONSUME: u8 = 4;
pub const CMD_ACK: u8 = 5;
pub const CMD_NACK: u8 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePolicy {
    pub visibility_timeout_ms: u64,
    pub max_retries: u32,
    pub max_payload_bytes: usize,
    pub default_delay_ms: u64,
    pub ttl_ms: Option<u64>,
    pub persistence_mode: PersistenceMode,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: DEFAULT_QUEUE_VISIBILITY_TIMEOUT_MS,
            max_retries: DEFAULT_QUEUE_MAX_RETRIES,
            max_payload_bytes: DEFAULT_QUEUE_MAX_PAYLOAD_BYTES,
            default_delay_ms: 0,
            ttl_ms: None,
            persistence_mode: PersistenceMode::Memory,
        }
    }
}

fn persistence_mode_to_str(mode: PersistenceMode) -> &'static str {
    match mode {
        PersistenceMode::Memory => "memory",
        PersistenceMode::FileSync => "file_sync",
        PersistenceMode::FileAsync => "file_async",
    }
}

fn persistence_mode_from_str(s: &str) -> Result<PersistenceMode> {
    match s {
        "memory" => Ok(PersistenceMode::Memory),
        "file_sync" => Ok(PersistenceMode::FileSync),
        "file_async" => Ok(PersistenceMode::FileAsync),
        other => Err(BrokerError::InvalidArgument(format!("unknown persistence mode {other}"))),
    }
}

impl QueuePolicy {
    fn decode(payload: &mut Bytes) -> Result<Self> {
        let defaults = Self::default();
        let visibility_timeout_ms = get_optional_u64(payload)?.unwrap_or(defaults.visibility_timeout_ms);
        let max_retries = get_optional_u64(payload)?.map(|v| v as u32).unwrap_or(defaults.max_retries);
        let max_payload_bytes =
            get_optional_u64(payload)?.map(|v| v as usize).unwrap_or(defaults.max_payload_bytes);
        let default_delay_ms = get_optional_u64(payload)?.unwrap_or(0);
        let ttl_ms = get_optional_u64(payload)?;
        let mode_str = get_string(payload)?;
        let persistence_mode = if mode_str.is_empty() {
            defaults.persistence_mode
        } else {
            persistence_mode_from_str(&mode_str)?
        };
        Ok(Self {
            visibility_timeout_ms,
            max_retries,
            max_payload_bytes,
            default_delay_ms,
            ttl_ms,
            persistence_mode,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        put_optional_u64(buf, Some(self.visibility_timeout_ms));
        put_optional_u64(buf, Some(self.max_retries as u64));
        put_optional_u64(buf, Some(self.max_payload_bytes as u64));
        put_optional_u64(buf, Some(self.default_delay_ms));
        put_optional_u64(buf, self.ttl_ms);
        put_string(buf, persistence_mode_to_str(self.persistence_mode));
    }
}

pub enum Command {
    Create { name: String, policy: QueuePolicy },
    Delete { name: String },
    Exists { name: String },
    Push { name: String, payload: Vec<u8>, priority: u8, delay_ms: Option<u64> },
    Consume { name: String, batch_size: u32, wait_ms: u64 },
    Ack { name: String, handle: u64 },
    Nack { name: String, handle: u64, reason: Option<String> },
}

impl Command {
    pub fn decode(command: u8, mut payload: Bytes) -> Result<Self> {
        match command {
            CMD_CREATE => {
                let name = get_string(&mut payload)?;
                let policy = QueuePolicy::decode(&mut payload)?;
                Ok(Command::Create { name, policy })
            }
            CMD_DELETE => Ok(Command::Delete { name: get_string(&mut payload)? }),
            CMD_EXISTS => Ok(Command::Exists { name: get_string(&mut payload)? }),
            CMD_PUSH => {
                let name = get_string(&mut payload)?;
                let data = get_bytes(&mut payload)?;
                if !payload.has_remaining() {
                    return Err(BrokerError::InvalidArgument("truncated push frame".into()));
                }
                let priority = payload.get_u8();
                let delay_ms = get_optional_u64(&mut payload)?;
                Ok(Command::Push { name, payload: data, priority, delay_ms })
            }
            CMD_CONSUME => {
                let name = get_string(&mut payload)?;
                let batch_size = crate::protocol::wire::get_varint(&mut payload)? as u32;
                let wait_ms = crate::protocol::wire::get_varint(&mut payload)?;
                Ok(Command::Consume { name, batch_size, wait_ms })
            }
            CMD_ACK => {
                let name = get_string(&mut payload)?;
                let handle = crate::protocol::wire::get_varint(&mut payload)?;
                Ok(Command::Ack { name, handle })
            }
            CMD_NACK => {
                let name = get_string(&mut payload)?;
                let handle = crate::protocol::wire::get_varint(&mut payload)?;
                let reason = get_optional_string(&mut payload)?;
                Ok(Command::Nack { name, handle, reason })
            }
            other => Err(BrokerError::InvalidArgument(format!("unknown queue command {other}"))),
        }
    }
}

pub fn encode_empty_reply() -> Bytes {
    Bytes::new()
}

pub fn encode_exists_reply(exists: bool) -> Bytes {
    Bytes::from(vec![exists as u8])
}

pub fn encode_push_reply(id: &str) -> Bytes {
    let mut buf = BytesMut::new();
    put_string(&mut buf, id);
    buf.freeze()
}

/// One delivered message in a `CONSUME` reply: `{handle, payload, attempts, priority}`.
pub struct DeliveredMessage {
    pub handle: u64,
    pub payload: Vec<u8>,
    pub attempts: u32,
    pub priority: u8,
}

pub fn encode_consume_reply(messages: &[DeliveredMessage]) -> Bytes {
    let mut buf = BytesMut::new();
    crate::protocol::wire::put_varint(&mut buf, messages.len() as u64);
    for m in messages {
        crate::protocol::wire::put_varint(&mut buf, m.handle);
        put_bytes(&mut buf, &m.payload);
        crate::protocol::wire::put_varint(&mut buf, m.attempts as u64);
        buf.put_u8(m.priority);
    }
    buf.freeze()
}

/// Summary row used by the admin `/api/queue` snapshot:
/// `{name, pending, inflight, scheduled, dlq}`.
pub struct QueueSummary {
    pub name: String,
    pub pending: usize,
    pub inflight: usize,
    pub scheduled: usize,
    pub dlq: usize,
    pub created_at_ms: i64,
    pub pushed: u64,
    pub acked: u64,
    pub dead_lettered: u64,
}

/// Which bucket of a queue's messages an admin peek targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStateFilter {
    Pending,
    Scheduled,
    InFlight,
}

impl MessageStateFilter {
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(MessageStateFilter::Pending),
            "scheduled" => Ok(MessageStateFilter::Scheduled),
            "inflight" => Ok(MessageStateFilter::InFlight),
            other => Err(BrokerError::InvalidArgument(format!("unknown queue message state {other}"))),
        }
    }
}

/// One row of an admin `/api/queue/{name}/messages` page.
pub struct MessageRow {
    pub id: String,
    pub payload: Vec<u8>,
    pub priority: u8,
    pub attempts: u32,
    pub enqueue_ts_ms: i64,
}

/// Admin-only request: peek a page of one queue's message bucket without
/// disturbing delivery state. `state` is one of `pending`/`scheduled`/
/// `inflight`/`dlq` (the last one redirects to the queue's DLQ sibling).
pub struct AdminPeekRequest {
    pub name: String,
    pub state: String,
    pub offset: usize,
    pub limit: usize,
}

impl AdminPeekRequest {
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let name = get_string(&mut payload)?;
        let state = get_string(&mut payload)?;
        let offset = crate::protocol::wire::get_varint(&mut payload)? as usize;
        let limit = crate::protocol::wire::get_varint(&mut payload)? as usize;
        Ok(Self { name, state, offset, limit })
    }
}

pub fn encode_message_page_reply(rows: &[MessageRow], total: usize) -> Bytes {
    let mut buf = BytesMut::new();
    crate::protocol::wire::put_varint(&mut buf, total as u64);
    crate::protocol::wire::put_varint(&mut buf, rows.len() as u64);
    for m in rows {
        put_string(&mut buf, &m.id);
        put_bytes(&mut buf, &m.payload);
        buf.put_u8(m.priority);
        crate::protocol::wire::put_varint(&mut buf, m.attempts as u64);
        buf.put_i64(m.enqueue_ts_ms);
    }
    buf.freeze()
}

pub fn encode_queue_list_reply(queues: &[QueueSummary]) -> Bytes {
    let mut buf = BytesMut::new();
    crate::protocol::wire::put_varint(&mut buf, queues.len() as u64);
    for q in queues {
        put_string(&mut buf, &q.name);
        crate::protocol::wire::put_varint(&mut buf, q.pending as u64);
        crate::protocol::wire::put_varint(&mut buf, q.inflight as u64);
        crate::protocol::wire::put_varint(&mut buf, q.scheduled as u64);
        crate::protocol::wire::put_varint(&mut buf, q.dlq as u64);
        buf.put_i64(q.created_at_ms);
        crate::protocol::wire::put_varint(&mut buf, q.pushed);
        crate::protocol::wire::put_varint(&mut buf, q.acked);
        crate::protocol::wire::put_varint(&mut buf, q.dead_lettered);
    }
    buf.freeze()
}

/// A single in-memory message, addressable by arena index while pending or
/// scheduled and by a separately minted handle while in flight.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub payload: Vec<u8>,
    pub priority: u8,
    pub attempts: u32,
    pub enqueue_seq: u64,
    pub enqueue_ts_ms: i64,
}

/// Append-only event persisted per mutating queue op, replayed on boot to
/// rebuild pending/scheduled state. Leases (in-flight) are never persisted:
/// a crash loses outstanding leases the same way an unacked message would
/// eventually time out and be redelivered.
pub enum QueueRecord {
    Push { id: String, payload: Vec<u8>, priority: u8, enqueue_ts_ms: i64, visible_at_ms: i64 },
    Ack { id: String },
    Dead { id: String },
}

const RECORD_PUSH: u8 = 0;
const RECORD_ACK: u8 = 1;
const RECORD_DEAD: u8 = 2;

impl QueueRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        match self {
            QueueRecord::Push { id, payload, priority, enqueue_ts_ms, visible_at_ms } => {
                buf.put_u8(RECORD_PUSH);
                put_string(&mut buf, id);
                put_bytes(&mut buf, payload);
                buf.put_u8(*priority);
                buf.put_i64(*enqueue_ts_ms);
                buf.put_i64(*visible_at_ms);
            }
            QueueRecord::Ack { id } => {
                buf.put_u8(RECORD_ACK);
                put_string(&mut buf, id);
            }
            QueueRecord::Dead { id } => {
                buf.put_u8(RECORD_DEAD);
                put_string(&mut buf, id);
            }
        }
        buf.to_vec()
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(raw);
        if !buf.has_remaining() {
            return Err(BrokerError::InvalidArgument("empty queue record".into()));
        }
        match buf.get_u8() {
            RECORD_PUSH => {
                let id = get_string(&mut buf)?;
                let payload = get_bytes(&mut buf)?;
                if !buf.has_remaining() {
                    return Err(BrokerError::InvalidArgument("truncated push record".into()));
                }
                let priority = buf.get_u8();
                let enqueue_ts_ms = buf.get_i64();
                let visible_at_ms = buf.get_i64();
                Ok(QueueRecord::Push { id, payload, priority, enqueue_ts_ms, visible_at_ms })
            }
            RECORD_ACK => Ok(QueueRecord::Ack { id: get_string(&mut buf)? }),
            RECORD_DEAD => Ok(QueueRecord::Dead { id: get_string(&mut buf)? }),
            other => Err(BrokerError::InvalidArgument(format!("unknown queue record kind {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_roundtrips_through_create_command() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "orders");
        let policy = QueuePolicy { visibility_timeout_ms: 1000, max_retries: 3, ..Default::default() };
        policy.encode(&mut buf);
        let decoded = Command::decode(CMD_CREATE, buf.freeze()).unwrap();
        match decoded {
            Command::Create { name, policy: p } => {
                assert_eq!(name, "orders");
                assert_eq!(p.visibility_timeout_ms, 1000);
                assert_eq!(p.max_retries, 3);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn queue_record_roundtrips() {
        let record = QueueRecord::Push {
            id: "abc".into(),
            payload: vec![1, 2, 3],
            priority: 9,
            enqueue_ts_ms: 42,
            visible_at_ms: 43,
        };
        let encoded = record.encode();
        match QueueRecord::decode(&encoded).unwrap() {
            QueueRecord::Push { id, payload, priority, enqueue_ts_ms, visible_at_ms } => {
                assert_eq!(id, "abc");
                assert_eq!(payload, vec![1, 2, 3]);
                assert_eq!(priority, 9);
                assert_eq!(enqueue_ts_ms, 42);
                assert_eq!(visible_at_ms, 43);
            }
            _ => panic!("wrong variant"),
        }
    }
}
