//! Route handlers: each calls the owning engine with the reserved snapshot
//! or admin-peek command, decodes the engine's wire-format reply, and
//! re-serializes it as JSON (spec.md §6). Read-only — no handler here ever
//! constructs a mutating `Command`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};

use crate::engines::pubsub::CMD_SNAPSHOT as PUBSUB_CMD_SNAPSHOT;
use crate::engines::queue::{CMD_ADMIN_MESSAGES as QUEUE_CMD_ADMIN_MESSAGES, CMD_SNAPSHOT as QUEUE_CMD_SNAPSHOT};
use crate::engines::store::CMD_SNAPSHOT as STORE_CMD_SNAPSHOT;
use crate::engines::stream::{CMD_ADMIN_MESSAGES as STREAM_CMD_ADMIN_MESSAGES, CMD_SNAPSHOT as STREAM_CMD_SNAPSHOT};
use crate::engines::Engines;
use crate::error::BrokerError;
use crate::protocol::wire::{get_bytes, get_optional_u64, get_string, get_varint, put_string, put_varint};

/// Maps a `BrokerError` to the HTTP status an admin client should see.
struct AdminError(BrokerError);

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            BrokerError::AlreadyExists(_) | BrokerError::PolicyMismatch(_) | BrokerError::RebalanceNeeded => StatusCode::CONFLICT,
            BrokerError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            BrokerError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.kind(), "message": self.0.to_string() }))).into_response()
    }
}

impl From<BrokerError> for AdminError {
    fn from(err: BrokerError) -> Self {
        AdminError(err)
    }
}

fn be_u64(buf: &mut Bytes) -> Result<u64, BrokerError> {
    let raw = get_bytes(buf)?;
    let arr: [u8; 8] = raw.try_into().map_err(|_| BrokerError::Internal)?;
    Ok(u64::from_be_bytes(arr))
}

fn be_i64(buf: &mut Bytes) -> Result<i64, BrokerError> {
    let raw = get_bytes(buf)?;
    let arr: [u8; 8] = raw.try_into().map_err(|_| BrokerError::Internal)?;
    Ok(i64::from_be_bytes(arr))
}

// ---------------------------------------------------------------- store ---

#[derive(Serialize)]
pub struct StoreKeyJson {
    pub key: String,
    pub value_preview: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

#[derive(Serialize)]
pub struct StoreSnapshotJson {
    pub total_keys: u64,
    pub expiring_keys: u64,
    pub keys: Vec<StoreKeyJson>,
}

pub async fn store_snapshot(State(engines): State<Engines>) -> Result<Json<StoreSnapshotJson>, AdminError> {
    let mut reply = engines.store.call(STORE_CMD_SNAPSHOT, Bytes::new(), None).await?;
    let total_keys = be_u64(&mut reply)?;
    let expiring_keys = be_u64(&mut reply)?;
    let count = be_u64(&mut reply)?;
    let mut keys = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = get_string(&mut reply)?;
        let value_preview = get_string(&mut reply)?;
        let created_at = be_i64(&mut reply)?;
        let expires_at = get_optional_u64(&mut reply)?.map(|v| v as i64);
        keys.push(StoreKeyJson { key, value_preview, created_at, expires_at });
    }
    Ok(Json(StoreSnapshotJson { total_keys, expiring_keys, keys }))
}

// ---------------------------------------------------------------- queue ---

#[derive(Serialize)]
pub struct QueueSummaryJson {
    pub name: String,
    pub pending: u64,
    pub inflight: u64,
    pub scheduled: u64,
    pub dlq: u64,
}

#[derive(Serialize)]
pub struct QueueListJson {
    pub queues: Vec<QueueSummaryJson>,
}

pub async fn queue_snapshot(State(engines): State<Engines>) -> Result<Json<QueueListJson>, AdminError> {
    let mut reply = engines.queue.call(QUEUE_CMD_SNAPSHOT, Bytes::new(), None).await?;
    let count = get_varint(&mut reply)?;
    let mut queues = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = get_string(&mut reply)?;
        let pending = get_varint(&mut reply)?;
        let inflight = get_varint(&mut reply)?;
        let scheduled = get_varint(&mut reply)?;
        let dlq = get_varint(&mut reply)?;
        let _created_at_ms = reply.get_i64();
        let _pushed = get_varint(&mut reply)?;
        let _acked = get_varint(&mut reply)?;
        let _dead_lettered = get_varint(&mut reply)?;
        queues.push(QueueSummaryJson { name, pending, inflight, scheduled, dlq });
    }
    Ok(Json(QueueListJson { queues }))
}

#[derive(Deserialize)]
pub struct QueueMessagesQuery {
    #[serde(default = "default_queue_state")]
    pub state: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_queue_state() -> String {
    "pending".to_string()
}

fn default_limit() -> u64 {
    50
}

#[derive(Serialize)]
pub struct QueueMessageJson {
    pub id: String,
    pub payload: String,
    pub priority: u8,
    pub attempts: u64,
    pub enqueue_ts_ms: i64,
}

#[derive(Serialize)]
pub struct QueueMessagesJson {
    pub messages: Vec<QueueMessageJson>,
    pub total: u64,
}

pub async fn queue_messages(
    State(engines): State<Engines>,
    Path(name): Path<String>,
    Query(query): Query<QueueMessagesQuery>,
) -> Result<Json<QueueMessagesJson>, AdminError> {
    let mut payload = bytes::BytesMut::new();
    put_string(&mut payload, &name);
    put_string(&mut payload, &query.state);
    put_varint(&mut payload, query.offset);
    put_varint(&mut payload, query.limit);

    let mut reply = engines.queue.call(QUEUE_CMD_ADMIN_MESSAGES, payload.freeze(), None).await?;
    let total = get_varint(&mut reply)?;
    let count = get_varint(&mut reply)?;
    let mut messages = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = get_string(&mut reply)?;
        let payload = get_bytes(&mut reply)?;
        if !reply.has_remaining() {
            return Err(BrokerError::Internal.into());
        }
        let priority = reply.get_u8();
        let attempts = get_varint(&mut reply)?;
        let enqueue_ts_ms = reply.get_i64();
        messages.push(QueueMessageJson {
            id,
            payload: String::from_utf8_lossy(&payload).into_owned(),
            priority,
            attempts,
            enqueue_ts_ms,
        });
    }
    Ok(Json(QueueMessagesJson { messages, total }))
}

// --------------------------------------------------------------- stream ---

#[derive(Serialize)]
pub struct StreamGroupJson {
    pub id: String,
    pub committed_offset: u64,
}

#[derive(Serialize)]
pub struct StreamPartitionJson {
    pub id: u32,
    pub last_offset: u64,
    pub groups: Vec<StreamGroupJson>,
}

#[derive(Serialize)]
pub struct StreamTopicJson {
    pub name: String,
    pub partitions: Vec<StreamPartitionJson>,
}

#[derive(Serialize)]
pub struct StreamListJson {
    pub topics: Vec<StreamTopicJson>,
}

pub async fn stream_snapshot(State(engines): State<Engines>) -> Result<Json<StreamListJson>, AdminError> {
    let mut reply = engines.stream.call(STREAM_CMD_SNAPSHOT, Bytes::new(), None).await?;
    let topic_count = get_varint(&mut reply)?;
    let mut topics = Vec::with_capacity(topic_count as usize);
    for _ in 0..topic_count {
        let name = get_string(&mut reply)?;
        let partition_count = get_varint(&mut reply)?;
        let mut partitions = Vec::with_capacity(partition_count as usize);
        for _ in 0..partition_count {
            let id = get_varint(&mut reply)? as u32;
            let last_offset = get_varint(&mut reply)?;
            let group_count = get_varint(&mut reply)?;
            let mut groups = Vec::with_capacity(group_count as usize);
            for _ in 0..group_count {
                let gid = get_string(&mut reply)?;
                let committed_offset = get_varint(&mut reply)?;
                groups.push(StreamGroupJson { id: gid, committed_offset });
            }
            partitions.push(StreamPartitionJson { id, last_offset, groups });
        }
        topics.push(StreamTopicJson { name, partitions });
    }
    Ok(Json(StreamListJson { topics }))
}

#[derive(Deserialize)]
pub struct StreamMessagesQuery {
    #[serde(default)]
    pub from: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

#[derive(Serialize)]
pub struct StreamRecordJson {
    pub offset: u64,
    pub ts_ms: i64,
    pub payload: String,
}

#[derive(Serialize)]
pub struct StreamMessagesJson {
    pub messages: Vec<StreamRecordJson>,
}

pub async fn stream_messages(
    State(engines): State<Engines>,
    Path((topic, partition)): Path<(String, u32)>,
    Query(query): Query<StreamMessagesQuery>,
) -> Result<Json<StreamMessagesJson>, AdminError> {
    let mut payload = bytes::BytesMut::new();
    put_string(&mut payload, &topic);
    put_varint(&mut payload, partition as u64);
    put_varint(&mut payload, query.from);
    put_varint(&mut payload, query.limit);

    let mut reply = engines.stream.call(STREAM_CMD_ADMIN_MESSAGES, payload.freeze(), None).await?;
    let count = get_varint(&mut reply)?;
    let mut messages = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let offset = get_varint(&mut reply)?;
        let ts_ms = reply.get_i64();
        let payload = get_bytes(&mut reply)?;
        messages.push(StreamRecordJson { offset, ts_ms, payload: String::from_utf8_lossy(&payload).into_owned() });
    }
    Ok(Json(StreamMessagesJson { messages }))
}

// --------------------------------------------------------------- pubsub ---

#[derive(Deserialize)]
pub struct PubSubQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_pubsub_limit")]
    pub limit: usize,
    #[serde(default)]
    pub search: Option<String>,
}

fn default_pubsub_limit() -> usize {
    100
}

#[derive(Serialize)]
pub struct PubSubTopicJson {
    pub full_path: String,
    pub subscribers: u32,
    pub retained_value: Option<String>,
}

#[derive(Serialize)]
pub struct PubSubWildcardsJson {
    pub multi_level: u32,
    pub single_level: u32,
}

#[derive(Serialize)]
pub struct PubSubSnapshotJson {
    pub active_clients: u32,
    pub total_topics: u32,
    pub topics: Vec<PubSubTopicJson>,
    pub wildcards: PubSubWildcardsJson,
}

pub async fn pubsub_snapshot(
    State(engines): State<Engines>,
    Query(query): Query<PubSubQuery>,
) -> Result<Json<PubSubSnapshotJson>, AdminError> {
    let mut reply = engines.pubsub.call(PUBSUB_CMD_SNAPSHOT, Bytes::new(), None).await?;
    let active_clients = get_varint(&mut reply)? as u32;
    let total_topics = get_varint(&mut reply)? as u32;
    let multi_level = get_varint(&mut reply)? as u32;
    let single_level = get_varint(&mut reply)? as u32;
    let row_count = get_varint(&mut reply)?;

    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let full_path = get_string(&mut reply)?;
        let subscribers = get_varint(&mut reply)? as u32;
        if !reply.has_remaining() {
            return Err(BrokerError::Internal.into());
        }
        let retained_value = match reply.get_u8() {
            1 => Some(String::from_utf8_lossy(&get_bytes(&mut reply)?).into_owned()),
            _ => None,
        };
        rows.push(PubSubTopicJson { full_path, subscribers, retained_value });
    }

    let filtered: Vec<PubSubTopicJson> = match &query.search {
        Some(needle) if !needle.is_empty() => rows.into_iter().filter(|row| row.full_path.contains(needle.as_str())).collect(),
        _ => rows,
    };
    let topics = filtered.into_iter().skip(query.offset).take(query.limit).collect();

    Ok(Json(PubSubSnapshotJson {
        active_clients,
        total_topics,
        topics,
        wildcards: PubSubWildcardsJson { multi_level, single_level },
    }))
}
