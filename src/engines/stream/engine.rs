//! Stream engine: one task owns every topic's partitions and consumer
//! groups (spec.md §4.5). Round-robin produce assignment, generation-fenced
//! consumer groups, and a retention sweep that advances committed offsets
//! forward when it drops old records.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::engines::EngineRequest;
use crate::error::{BrokerError, Result};
use crate::persistence::SegmentLog;

use super::coordinator::ConsumerGroup;
use super::types::{
    AdminFetchRequest, Command, FetchedRecord, PartitionSummary, StreamPolicy, StreamRecord, TopicSummary,
    encode_empty_reply, encode_fetch_reply, encode_join_reply, encode_publish_reply, encode_topic_list_reply,
};

const TICK_INTERVAL_MS: u64 = 500;
const SNAPSHOT_COMMAND: u8 = 255;
const ADMIN_MESSAGES_COMMAND: u8 = 254;
const POLICY_FILE: &str = "policy.json";

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

struct Partition {
    records: VecDeque<(i64, Vec<u8>)>,
    start_offset: u64,
    log: SegmentLog,
}

impl Partition {
    fn next_offset(&self) -> u64 {
        self.start_offset + self.records.len() as u64
    }

    fn append(&mut self, ts_ms: i64, payload: Vec<u8>) -> u64 {
        let offset = self.next_offset();
        self.records.push_back((ts_ms, payload));
        offset
    }

    fn fetch(&self, from_offset: u64, limit: u32) -> Vec<FetchedRecord> {
        if from_offset < self.start_offset {
            return self.records.iter().take(limit as usize).enumerate().map(|(i, (ts, payload))| FetchedRecord {
                offset: self.start_offset + i as u64,
                ts_ms: *ts,
                payload: payload.clone(),
            }).collect();
        }
        let skip = (from_offset - self.start_offset) as usize;
        self.records
            .iter()
            .skip(skip)
            .take(limit as usize)
            .enumerate()
            .map(|(i, (ts, payload))| FetchedRecord { offset: from_offset + i as u64, ts_ms: *ts, payload: payload.clone() })
            .collect()
    }

    /// Drop records past `max_age_ms`/`max_bytes`; returns the new floor
    /// offset so the caller can advance committed offsets forward.
    fn apply_retention(&mut self, max_age_ms: u64, max_bytes: u64) -> u64 {
        let now = now_ms();
        let mut total_bytes: u64 = self.records.iter().map(|(_, p)| p.len() as u64).sum();
        while let Some((ts, payload)) = self.records.front() {
            let too_old = max_age_ms > 0 && now - ts > max_age_ms as i64;
            let too_big = max_bytes > 0 && total_bytes > max_bytes;
            if !too_old && !too_big {
                break;
            }
            total_bytes -= payload.len() as u64;
            self.records.pop_front();
            self.start_offset += 1;
        }
        self.start_offset
    }
}

struct TopicState {
    policy: StreamPolicy,
    partitions: Vec<Partition>,
    groups: HashMap<String, ConsumerGroup>,
    round_robin: u64,
}

pub struct StreamEngine {
    root: Option<PathBuf>,
    topics: HashMap<String, TopicState>,
}

impl StreamEngine {
    pub async fn boot(root: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut topics = HashMap::new();
        if let Some(root) = &root {
            tokio::fs::create_dir_all(root).await?;
            let mut entries = tokio::fs::read_dir(root).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let dir = entry.path();
                let Ok(raw) = tokio::fs::read(dir.join(POLICY_FILE)).await else { continue };
                let Ok(policy) = serde_json::from_slice::<StreamPolicy>(&raw) else { continue };
                let name = entry.file_name().to_string_lossy().into_owned();
                match Self::replay_topic(dir, policy).await {
                    Ok(state) => {
                        topics.insert(name, state);
                    }
                    Err(err) => warn!(topic = %name, error = %err, "failed to replay topic, starting empty"),
                }
            }
        }
        Ok(Self { root, topics })
    }

    async fn replay_topic(dir: PathBuf, policy: StreamPolicy) -> anyhow::Result<TopicState> {
        let mut partitions = Vec::with_capacity(policy.partitions as usize);
        for p in 0..policy.partitions {
            let part_dir = dir.join(format!("partition-{p}"));
            let raw_records = SegmentLog::replay(&part_dir).await?;
            let log = SegmentLog::open(part_dir, policy.persistence_mode).await?;
            let mut records = VecDeque::with_capacity(raw_records.len());
            for raw in raw_records {
                if let Ok(record) = StreamRecord::decode(&raw) {
                    records.push_back((record.ts_ms, record.payload));
                }
            }
            partitions.push(Partition { records, start_offset: 0, log });
        }
        Ok(TopicState { policy, partitions, groups: HashMap::new(), round_robin: 0 })
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_millis(TICK_INTERVAL_MS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.tick().await;
                }
                maybe_req = rx.recv() => {
                    match maybe_req {
                        Some(req) => self.handle(req).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn tick(&mut self) {
        let now = now_ms();
        for topic in self.topics.values_mut() {
            let partitions = topic.partitions.len() as u32;
            for group in topic.groups.values_mut() {
                group.evict_stale(now, partitions);
            }
            for (idx, partition) in topic.partitions.iter_mut().enumerate() {
                let floor = partition.apply_retention(topic.policy.retention_max_age_ms, topic.policy.retention_max_bytes);
                for group in topic.groups.values_mut() {
                    group.advance_floor(idx as u32, floor);
                }
                if partition.log.has_unflushed_writes() {
                    if let Err(err) = partition.log.flush().await {
                        warn!(error = %err, "stream partition flush failed");
                    }
                }
            }
        }
    }

    async fn handle(&mut self, req: EngineRequest) {
        if req.command == SNAPSHOT_COMMAND {
            let _ = req.reply.send(Ok(self.snapshot()));
            return;
        }
        if req.command == ADMIN_MESSAGES_COMMAND {
            let _ = req.reply.send(self.admin_peek_messages(req.payload));
            return;
        }
        match Command::decode(req.command, req.payload) {
            Ok(cmd) => self.apply(cmd, req.push_sender, req.reply).await,
            Err(err) => {
                let _ = req.reply.send(Err(err));
            }
        }
    }

    async fn apply(
        &mut self,
        cmd: Command,
        push_sender: Option<mpsc::Sender<bytes::Bytes>>,
        reply: tokio::sync::oneshot::Sender<Result<bytes::Bytes>>,
    ) {
        match cmd {
            Command::Create { topic, policy } => {
                let outcome = match self.topics.get(&topic) {
                    Some(existing) if existing.policy == policy => Ok(encode_empty_reply()),
                    Some(_) => Err(BrokerError::PolicyMismatch(topic.clone())),
                    None => match self.open_topic(&topic, policy).await {
                        Ok(state) => {
                            self.topics.insert(topic, state);
                            Ok(encode_empty_reply())
                        }
                        Err(err) => {
                            warn!(error = %err, "failed to create topic");
                            Err(BrokerError::Internal)
                        }
                    },
                };
                let _ = reply.send(outcome);
            }
            Command::Delete { topic } => {
                self.topics.remove(&topic);
                let _ = reply.send(Ok(encode_empty_reply()));
            }
            Command::Publish { topic, payload } => {
                let outcome = match self.topics.get_mut(&topic) {
                    Some(state) => {
                        let idx = (state.round_robin % state.partitions.len().max(1) as u64) as usize;
                        state.round_robin += 1;
                        let now = now_ms();
                        let partition = &mut state.partitions[idx];
                        match partition.log.append(&StreamRecord { ts_ms: now, payload: payload.clone() }.encode()).await {
                            Ok(()) => {
                                let offset = partition.append(now, payload);
                                Ok(encode_publish_reply(idx as u32, offset))
                            }
                            Err(err) => {
                                warn!(error = %err, "stream publish persistence failed");
                                Err(BrokerError::Internal)
                            }
                        }
                    }
                    None => Err(BrokerError::NotFound(topic)),
                };
                let _ = reply.send(outcome);
            }
            Command::Join { topic, group, client_id } => {
                let outcome = match self.topics.get_mut(&topic) {
                    Some(state) => {
                        let partitions = state.partitions.len() as u32;
                        let coordinator = state.groups.entry(group).or_default();
                        let assigned = coordinator.join(&client_id, push_sender, partitions, now_ms());
                        Ok(encode_join_reply(coordinator.generation_id, &assigned))
                    }
                    None => Err(BrokerError::NotFound(topic)),
                };
                let _ = reply.send(outcome);
            }
            Command::Fetch { topic, group, generation_id, partition, from_offset, limit } => {
                let outcome = match self.topics.get_mut(&topic) {
                    Some(state) => match state.groups.get_mut(&group) {
                        Some(coordinator) if generation_id < coordinator.generation_id => Err(BrokerError::RebalanceNeeded),
                        Some(coordinator) => match state.partitions.get(partition as usize) {
                            Some(part) => {
                                coordinator.touch_partition_owner(partition, now_ms());
                                Ok(encode_fetch_reply(&part.fetch(from_offset, limit)))
                            }
                            None => Err(BrokerError::InvalidArgument(format!("no partition {partition}"))),
                        },
                        None => Err(BrokerError::NotFound(group)),
                    },
                    None => Err(BrokerError::NotFound(topic)),
                };
                let _ = reply.send(outcome);
            }
            Command::Commit { topic, group, generation_id, partition, next_offset } => {
                let outcome = match self.topics.get_mut(&topic) {
                    Some(state) => match state.groups.get_mut(&group) {
                        Some(coordinator) => coordinator.commit(generation_id, partition, next_offset).map(|_| encode_empty_reply()),
                        None => Err(BrokerError::NotFound(group)),
                    },
                    None => Err(BrokerError::NotFound(topic)),
                };
                let _ = reply.send(outcome);
            }
            Command::Leave { topic, group, client_id } => {
                if let Some(state) = self.topics.get_mut(&topic) {
                    let partitions = state.partitions.len() as u32;
                    if let Some(coordinator) = state.groups.get_mut(&group) {
                        coordinator.leave(&client_id, partitions);
                    }
                }
                let _ = reply.send(Ok(encode_empty_reply()));
            }
        }
    }

    async fn open_topic(&self, name: &str, policy: StreamPolicy) -> anyhow::Result<TopicState> {
        let dir = self.unit_dir(name);
        if policy.persistence_mode.is_durable() {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(POLICY_FILE), serde_json::to_vec(&policy)?).await?;
        }
        let mut partitions = Vec::with_capacity(policy.partitions as usize);
        for p in 0..policy.partitions {
            let part_dir = dir.join(format!("partition-{p}"));
            let log = SegmentLog::open(part_dir, policy.persistence_mode).await?;
            partitions.push(Partition { records: VecDeque::new(), start_offset: 0, log });
        }
        Ok(TopicState { policy, partitions, groups: HashMap::new(), round_robin: 0 })
    }

    /// Admin-only read of one partition's records, independent of any
    /// consumer group's committed offset.
    fn admin_peek_messages(&self, payload: bytes::Bytes) -> Result<bytes::Bytes> {
        let req = AdminFetchRequest::decode(payload)?;
        let state = self.topics.get(&req.topic).ok_or_else(|| BrokerError::NotFound(req.topic.clone()))?;
        let partition = state
            .partitions
            .get(req.partition as usize)
            .ok_or_else(|| BrokerError::InvalidArgument(format!("no partition {}", req.partition)))?;
        Ok(encode_fetch_reply(&partition.fetch(req.from_offset, req.limit)))
    }

    fn unit_dir(&self, name: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(name),
            None => PathBuf::from(name),
        }
    }

    fn snapshot(&self) -> bytes::Bytes {
        let mut topics: Vec<TopicSummary> = self
            .topics
            .iter()
            .map(|(name, state)| TopicSummary {
                name: name.clone(),
                partitions: state
                    .partitions
                    .iter()
                    .enumerate()
                    .map(|(id, part)| PartitionSummary {
                        id: id as u32,
                        last_offset: part.next_offset(),
                        groups: state.groups.iter().map(|(gid, g)| (gid.clone(), g.committed_offset(id as u32))).collect(),
                    })
                    .collect(),
            })
            .collect();
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        encode_topic_list_reply(&topics)
    }
}

pub const CMD_SNAPSHOT: u8 = SNAPSHOT_COMMAND;
pub const CMD_ADMIN_MESSAGES: u8 = ADMIN_MESSAGES_COMMAND;
