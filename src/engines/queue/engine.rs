//! Queue engine: one task owns every named queue. Dispatch decodes the wire
//! command, looks up (or creates) the named `QueueState`, and applies it;
//! a periodic tick drives scheduled-promotion, lease-timeout sweeps, TTL
//! expiry, and `file_async` flushing across every queue.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::core::constants::DLQ_SUFFIX;
use crate::engines::EngineRequest;
use crate::error::{BrokerError, Result};

use super::state::{FailOutcome, QueueState};
use super::types::{
    AdminPeekRequest, Command, DeliveredMessage, MessageStateFilter, QueuePolicy, QueueSummary, encode_consume_reply,
    encode_empty_reply, encode_exists_reply, encode_message_page_reply, encode_push_reply, encode_queue_list_reply,
};

const TICK_INTERVAL_MS: u64 = 50;
const SNAPSHOT_COMMAND: u8 = 255;
const ADMIN_MESSAGES_COMMAND: u8 = 254;

const POLICY_FILE: &str = "policy.json";

pub struct QueueEngine {
    root: Option<PathBuf>,
    queues: HashMap<String, QueueState>,
}

impl QueueEngine {
    /// Boot by scanning `root` for previously-persisted queues (each a
    /// subdirectory holding a `policy.json` sidecar) and replaying their
    /// segment logs.
    pub async fn boot(root: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut queues = HashMap::new();
        if let Some(root) = &root {
            tokio::fs::create_dir_all(root).await?;
            let mut entries = tokio::fs::read_dir(root).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let dir = entry.path();
                let policy_path = dir.join(POLICY_FILE);
                let Ok(raw) = tokio::fs::read(&policy_path).await else { continue };
                let Ok(policy) = serde_json::from_slice::<QueuePolicy>(&raw) else { continue };
                let name = entry.file_name().to_string_lossy().into_owned();
                match QueueState::replay(dir, policy).await {
                    Ok(state) => {
                        queues.insert(name, state);
                    }
                    Err(err) => warn!(queue = %name, error = %err, "failed to replay queue, starting empty"),
                }
            }
        }
        Ok(Self { root, queues })
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
        let names: Vec<String> = self.queues.keys().cloned().collect();
        for name in &names {
            let outcomes = {
                let Some(state) = self.queues.get_mut(name) else { continue };
                state.promote_scheduled();
                state.expire_ttl();
                let outcomes = state.sweep_timed_out_leases().await;
                state.drain_waiters();
                state.expire_waiters();
                if state.has_unflushed_writes() {
                    if let Err(err) = state.flush().await {
                        warn!(queue = %name, error = %err, "queue flush failed");
                    }
                }
                outcomes
            };
            self.apply_fail_outcomes(name, outcomes, "timeout").await;
        }
    }

    async fn apply_fail_outcomes(&mut self, name: &str, outcomes: Vec<FailOutcome>, reason: &str) {
        for outcome in outcomes {
            if let FailOutcome::Dead(msg) = outcome {
                self.promote_to_dlq(name, msg, reason.to_string()).await;
            }
        }
        if let Some(state) = self.queues.get_mut(name) {
            state.drain_waiters();
        }
    }

    async fn promote_to_dlq(&mut self, primary: &str, msg: super::types::Message, reason: String) {
        let dlq_name = format!("{primary}{DLQ_SUFFIX}");
        if !self.queues.contains_key(&dlq_name) {
            let policy = self.queues.get(primary).map(|q| q.policy.clone()).unwrap_or_default();
            if let Err(err) = self.ensure_queue(&dlq_name, policy).await {
                warn!(queue = %dlq_name, error = %err, "failed to create dlq");
                return;
            }
        }
        if let Some(dlq) = self.queues.get_mut(&dlq_name) {
            if let Err(err) = dlq.push_dead(msg, reason).await {
                warn!(queue = %dlq_name, error = %err, "failed to push into dlq");
            }
        }
    }

    async fn ensure_queue(&mut self, name: &str, policy: QueuePolicy) -> Result<()> {
        if self.queues.contains_key(name) {
            return Ok(());
        }
        let state = self.open_queue(name, policy).await.map_err(|_| BrokerError::Internal)?;
        self.queues.insert(name.to_string(), state);
        Ok(())
    }

    async fn open_queue(&self, name: &str, policy: QueuePolicy) -> anyhow::Result<QueueState> {
        let dir = self.unit_dir(name)?;
        if policy.persistence_mode.is_durable() {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(POLICY_FILE), serde_json::to_vec(&policy)?).await?;
        }
        QueueState::create(dir, policy).await
    }

    fn unit_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.join(name)),
            None => Ok(Path::new(name).to_path_buf()),
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
            Ok(cmd) => self.apply(cmd, req.reply).await,
            Err(err) => {
                let _ = req.reply.send(Err(err));
            }
        }
    }

    /// Applies a decoded command. Every branch resolves `reply` itself,
    /// either immediately or later via a parked long-poll waiter.
    async fn apply(&mut self, cmd: Command, reply: tokio::sync::oneshot::Sender<Result<bytes::Bytes>>) {
        match cmd {
            Command::Create { name, policy } => {
                let outcome = match self.queues.get(&name) {
                    Some(existing) if existing.policy == policy => Ok(encode_empty_reply()),
                    Some(_) => Err(BrokerError::PolicyMismatch(name.clone())),
                    None => match self.open_queue(&name, policy.clone()).await {
                        Ok(state) => {
                            self.queues.insert(name, state);
                            Ok(encode_empty_reply())
                        }
                        Err(err) => {
                            warn!(error = %err, "failed to create queue");
                            Err(BrokerError::Internal)
                        }
                    },
                };
                let _ = reply.send(outcome);
            }
            Command::Delete { name } => {
                self.queues.remove(&name);
                let _ = reply.send(Ok(encode_empty_reply()));
            }
            Command::Exists { name } => {
                let _ = reply.send(Ok(encode_exists_reply(self.queues.contains_key(&name))));
            }
            Command::Push { name, payload, priority, delay_ms } => {
                let outcome = match self.queues.get_mut(&name) {
                    Some(state) => state.push(payload, priority, delay_ms).await.map(|id| encode_push_reply(&id)),
                    None => Err(BrokerError::NotFound(name.clone())),
                };
                if outcome.is_ok() {
                    if let Some(state) = self.queues.get_mut(&name) {
                        state.drain_waiters();
                    }
                }
                let _ = reply.send(outcome);
            }
            Command::Consume { name, batch_size, wait_ms } => {
                let Some(state) = self.queues.get_mut(&name) else {
                    let _ = reply.send(Err(BrokerError::NotFound(name)));
                    return;
                };
                let batch: Vec<DeliveredMessage> = state.try_consume(batch_size);
                if !batch.is_empty() || wait_ms == 0 {
                    let _ = reply.send(Ok(encode_consume_reply(&batch)));
                } else {
                    state.park(batch_size, wait_ms, reply);
                }
            }
            Command::Ack { name, handle } => {
                let outcome = match self.queues.get_mut(&name) {
                    Some(state) => state.ack(handle).await.map(|_| encode_empty_reply()),
                    None => Err(BrokerError::NotFound(name)),
                };
                let _ = reply.send(outcome);
            }
            Command::Nack { name, handle, reason } => {
                let Some(state) = self.queues.get_mut(&name) else {
                    let _ = reply.send(Err(BrokerError::NotFound(name)));
                    return;
                };
                match state.fail(handle).await {
                    Ok(FailOutcome::Unknown) => {
                        let _ = reply.send(Err(BrokerError::NotFound(format!("handle {handle}"))));
                    }
                    Ok(outcome) => {
                        let _ = reply.send(Ok(encode_empty_reply()));
                        self.apply_fail_outcomes(&name, vec![outcome], reason.as_deref().unwrap_or("nack")).await;
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
        }
    }

    /// Admin-only read of one queue's message bucket, never touching
    /// delivery state (`state` is `pending`/`scheduled`/`inflight`/`dlq`).
    fn admin_peek_messages(&self, payload: bytes::Bytes) -> Result<bytes::Bytes> {
        let req = AdminPeekRequest::decode(payload)?;
        let (queue_name, filter) = if req.state == "dlq" {
            (format!("{}{DLQ_SUFFIX}", req.name), MessageStateFilter::Pending)
        } else {
            (req.name.clone(), MessageStateFilter::from_str(&req.state)?)
        };
        let Some(state) = self.queues.get(&queue_name) else {
            return Err(BrokerError::NotFound(queue_name));
        };
        let (rows, total) = state.peek_messages(filter, req.offset, req.limit);
        Ok(encode_message_page_reply(&rows, total))
    }

    fn snapshot(&self) -> bytes::Bytes {
        let mut queues: Vec<QueueSummary> = self
            .queues
            .iter()
            .map(|(name, state)| QueueSummary {
                name: name.clone(),
                pending: state.pending_len(),
                inflight: state.inflight_len(),
                scheduled: state.scheduled_len(),
                dlq: self.queues.get(&format!("{name}{DLQ_SUFFIX}")).map(|q| q.pending_len()).unwrap_or(0),
                created_at_ms: state.created_at_ms,
                pushed: state.pushed,
                acked: state.acked,
                dead_lettered: state.dead_lettered,
            })
            .collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));
        encode_queue_list_reply(&queues)
    }
}

pub const CMD_SNAPSHOT: u8 = SNAPSHOT_COMMAND;
pub const CMD_ADMIN_MESSAGES: u8 = ADMIN_MESSAGES_COMMAND;
