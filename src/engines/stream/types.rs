//! Stream wire commands, topic policy, and the persisted record shape
//! (spec.md §3, §4.5, §6).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::core::constants::{DEFAULT_STREAM_PARTITIONS, DEFAULT_STREAM_RETENTION_MAX_AGE_MS, DEFAULT_STREAM_RETENTION_MAX_BYTES};
use crate::error::{BrokerError, Result};
use crate::persistence::PersistenceMode;
use crate::protocol::wire::{
    get_bytes, get_optional_u64, get_string, get_varint, put_bytes, put_optional_u64, put_string, put_varint,
};

pub const CMD_CREATE: u8 = 0;
pub const CMD_DELETE: u8 = 1;
pub const CMD_PUBLISH: u8 = 2;
pub const CMD_JOIN: u8 = 3;
pub const CMD_FETCH: u8 = 4;
pub const CMD_COMMIT: u8 = 5;
pub const CMD_LEAVE: u8 = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPolicy {
    pub partitions: u32,
    pub persistence_mode: PersistenceMode,
    pub retention_max_age_ms: u64,
    pub retention_max_bytes: u64,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_STREAM_PARTITIONS,
            persistence_mode: PersistenceMode::Memory,
            retention_max_age_ms: DEFAULT_STREAM_RETENTION_MAX_AGE_MS,
            retention_max_bytes: DEFAULT_STREAM_RETENTION_MAX_BYTES,
        }
    }
}

fn mode_to_str(mode: PersistenceMode) -> &'static str {
    match mode {
        PersistenceMode::Memory => "memory",
        PersistenceMode::FileSync => "file_sync",
        PersistenceMode::FileAsync => "file_async",
    }
}

fn mode_from_str(s: &str) -> Result<PersistenceMode> {
    match s {
        "memory" => Ok(PersistenceMode::Memory),
        "file_sync" => Ok(PersistenceMode::FileSync),
        "file_async" => Ok(PersistenceMode::FileAsync),
        other => Err(BrokerError::InvalidArgument(format!("unknown persistence mode {other}"))),
    }
}

impl StreamPolicy {
    fn decode(payload: &mut Bytes) -> Result<Self> {
        let defaults = Self::default();
        let partitions = get_optional_u64(payload)?.map(|v| v as u32).unwrap_or(defaults.partitions);
        let retention_max_age_ms = get_optional_u64(payload)?.unwrap_or(defaults.retention_max_age_ms);
        let retention_max_bytes = get_optional_u64(payload)?.unwrap_or(defaults.retention_max_bytes);
        let mode_str = get_string(payload)?;
        let persistence_mode = if mode_str.is_empty() { defaults.persistence_mode } else { mode_from_str(&mode_str)? };
        Ok(Self { partitions, persistence_mode, retention_max_age_ms, retention_max_bytes })
    }

    fn encode(&self, buf: &mut BytesMut) {
        put_optional_u64(buf, Some(self.partitions as u64));
        put_optional_u64(buf, Some(self.retention_max_age_ms));
        put_optional_u64(buf, Some(self.retention_max_bytes));
        put_string(buf, mode_to_str(self.persistence_mode));
    }
}

pub enum Command {
    Create { topic: String, policy: StreamPolicy },
    Delete { topic: String },
    Publish { topic: String, payload: Vec<u8> },
    Join { topic: String, group: String, client_id: String },
    Fetch { topic: String, group: String, generation_id: u64, partition: u32, from_offset: u64, limit: u32 },
    Commit { topic: String, group: String, generation_id: u64, partition: u32, next_offset: u64 },
    Leave { topic: String, group: String, client_id: String },
}

impl Command {
    pub fn decode(command: u8, mut payload: Bytes) -> Result<Self> {
        match command {
            CMD_CREATE => {
                let topic = get_string(&mut payload)?;
                let policy = StreamPolicy::decode(&mut payload)?;
                Ok(Command::Create { topic, policy })
            }
            CMD_DELETE => Ok(Command::Delete { topic: get_string(&mut payload)? }),
            CMD_PUBLISH => {
                let topic = get_string(&mut payload)?;
                let payload_bytes = get_bytes(&mut payload)?;
                Ok(Command::Publish { topic, payload: payload_bytes })
            }
            CMD_JOIN => {
                let topic = get_string(&mut payload)?;
                let group = get_string(&mut payload)?;
                let client_id = get_string(&mut payload)?;
                Ok(Command::Join { topic, group, client_id })
            }
            CMD_FETCH => {
                let topic = get_string(&mut payload)?;
                let group = get_string(&mut payload)?;
                let generation_id = get_varint(&mut payload)?;
                let partition = get_varint(&mut payload)? as u32;
                let from_offset = get_varint(&mut payload)?;
                let limit = get_varint(&mut payload)? as u32;
                Ok(Command::Fetch { topic, group, generation_id, partition, from_offset, limit })
            }
            CMD_COMMIT => {
                let topic = get_string(&mut payload)?;
                let group = get_string(&mut payload)?;
                let generation_id = get_varint(&mut payload)?;
                let partition = get_varint(&mut payload)? as u32;
                let next_offset = get_varint(&mut payload)?;
                Ok(Command::Commit { topic, group, generation_id, partition, next_offset })
            }
            CMD_LEAVE => {
                let topic = get_string(&mut payload)?;
                let group = get_string(&mut payload)?;
                let client_id = get_string(&mut payload)?;
                Ok(Command::Leave { topic, group, client_id })
            }
            other => Err(BrokerError::InvalidArgument(format!("unknown stream command {other}"))),
        }
    }
}

pub fn encode_empty_reply() -> Bytes {
    Bytes::new()
}

pub fn encode_publish_reply(partition: u32, offset: u64) -> Bytes {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, partition as u64);
    put_varint(&mut buf, offset);
    buf.freeze()
}

pub fn encode_join_reply(generation_id: u64, assignments: &[u32]) -> Bytes {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, generation_id);
    put_varint(&mut buf, assignments.len() as u64);
    for p in assignments {
        put_varint(&mut buf, *p as u64);
    }
    buf.freeze()
}

pub struct FetchedRecord {
    pub offset: u64,
    pub ts_ms: i64,
    pub payload: Vec<u8>,
}

pub fn encode_fetch_reply(records: &[FetchedRecord]) -> Bytes {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, records.len() as u64);
    for r in records {
        put_varint(&mut buf, r.offset);
        buf.put_i64(r.ts_ms);
        put_bytes(&mut buf, &r.payload);
    }
    buf.freeze()
}

/// One record persisted per partition segment; offsets themselves are not
/// stored (they are the record's position in replay order).
pub struct StreamRecord {
    pub ts_ms: i64,
    pub payload: Vec<u8>,
}

impl StreamRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_i64(self.ts_ms);
        put_bytes(&mut buf, &self.payload);
        buf.to_vec()
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        let mut buf = Bytes::copy_from_slice(raw);
        if buf.remaining() < 8 {
            return Err(BrokerError::InvalidArgument("truncated stream record".into()));
        }
        let ts_ms = buf.get_i64();
        let payload = get_bytes(&mut buf)?;
        Ok(Self { ts_ms, payload })
    }
}

/// Admin-only request: peek a page of one partition's records without
/// joining a consumer group.
pub struct AdminFetchRequest {
    pub topic: String,
    pub partition: u32,
    pub from_offset: u64,
    pub limit: u32,
}

impl AdminFetchRequest {
    pub fn decode(mut payload: Bytes) -> Result<Self> {
        let topic = get_string(&mut payload)?;
        let partition = get_varint(&mut payload)? as u32;
        let from_offset = get_varint(&mut payload)?;
        let limit = get_varint(&mut payload)? as u32;
        Ok(Self { topic, partition, from_offset, limit })
    }
}

/// Admin `/api/stream` row shape: `{id, last_offset, groups: [{id, committed_offset}]}`.
pub struct PartitionSummary {
    pub id: u32,
    pub last_offset: u64,
    pub groups: Vec<(String, u64)>,
}

pub struct TopicSummary {
    pub name: String,
    pub partitions: Vec<PartitionSummary>,
}

pub fn encode_topic_list_reply(topics: &[TopicSummary]) -> Bytes {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, topics.len() as u64);
    for t in topics {
        put_string(&mut buf, &t.name);
        put_varint(&mut buf, t.partitions.len() as u64);
        for p in &t.partitions {
            put_varint(&mut buf, p.id as u64);
            put_varint(&mut buf, p.last_offset);
            put_varint(&mut buf, p.groups.len() as u64);
            for (gid, committed) in &p.groups {
                put_string(&mut buf, gid);
                put_varint(&mut buf, *committed);
            }
        }
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_roundtrips_through_create_command() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "events");
        let policy = StreamPolicy { partitions: 4, ..Default::default() };
        policy.encode(&mut buf);
        match Command::decode(CMD_CREATE, buf.freeze()).unwrap() {
            Command::Create { topic, policy: p } => {
                assert_eq!(topic, "events");
                assert_eq!(p.partitions, 4);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn stream_record_roundtrips() {
        let record = StreamRecord { ts_ms: 7, payload: vec![9, 9] };
        let decoded = StreamRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.ts_ms, 7);
        assert_eq!(decoded.payload, vec![9, 9]);
    }
}
