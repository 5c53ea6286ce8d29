//! Per-queue state: pending/scheduled heaps, in-flight table, message arena,
//! and long-poll waiters (spec.md §4.4).
//!
//! Uses a single wall-clock (`chrono::Utc`) source for both leases and
//! scheduled-delay timestamps rather than splitting monotonic-for-timeouts
//! from wall-clock-for-display: scheduled entries are persisted and must be
//! deterministic across a restart, so the engine standardizes on the clock
//! that can actually be replayed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{BrokerError, Result};
use crate::persistence::SegmentLog;

use super::types::{DeliveredMessage, Message, QueuePolicy, QueueRecord, encode_consume_reply};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Every heap/lease entry carries the generation its `arena_idx` had at the
/// time it was recorded. `arena_insert` bumps the generation on every slot
/// reuse, so an entry left behind by a removal that didn't also pop its
/// heap/lease record (TTL expiry chiefly) is detected as stale instead of
/// silently aliasing whatever message the freed slot was later reused for.
#[derive(PartialEq, Eq)]
struct PendingEntry {
    priority: u8,
    seq: Reverse<u64>,
    arena_idx: usize,
    generation: u64,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(PartialEq, Eq)]
struct ScheduledEntry {
    key: Reverse<(i64, u64)>,
    arena_idx: usize,
    generation: u64,
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct InFlight {
    arena_idx: usize,
    generation: u64,
    next_visibility_ms: i64,
}

struct Waiter {
    batch_size: u32,
    deadline_ms: i64,
    reply: oneshot::Sender<Result<bytes::Bytes>>,
}

pub enum FailOutcome {
    Rescheduled,
    Dead(Message),
    Unknown,
}

pub struct QueueState {
    pub policy: QueuePolicy,
    pending: BinaryHeap<PendingEntry>,
    scheduled: BinaryHeap<ScheduledEntry>,
    in_flight: HashMap<u64, InFlight>,
    arena: Vec<Option<(u64, Message)>>,
    free_slots: Vec<usize>,
    next_generation: u64,
    waiters: VecDeque<Waiter>,
    next_seq: u64,
    next_handle: u64,
    log: SegmentLog,
    pub created_at_ms: i64,
    pub pushed: u64,
    pub acked: u64,
    pub dead_lettered: u64,
}

impl QueueState {
    pub async fn create(dir: PathBuf, policy: QueuePolicy) -> anyhow::Result<Self> {
        let log = SegmentLog::open(dir, policy.persistence_mode).await?;
        Ok(Self {
            policy,
            pending: BinaryHeap::new(),
            scheduled: BinaryHeap::new(),
            in_flight: HashMap::new(),
            arena: Vec::new(),
            free_slots: Vec::new(),
            next_generation: 0,
            waiters: VecDeque::new(),
            next_seq: 0,
            next_handle: 0,
            log,
            created_at_ms: now_ms(),
            pushed: 0,
            acked: 0,
            dead_lettered: 0,
        })
    }

    /// Rebuild pending/scheduled state from a previously persisted log.
    /// Leases are never replayed: a message that was in flight at crash time
    /// comes back as whatever the log last recorded for it (pending or
    /// scheduled), which is at worst a duplicate delivery — consistent with
    /// the engine's at-least-once queue semantics.
    pub async fn replay(dir: PathBuf, policy: QueuePolicy) -> anyhow::Result<Self> {
        let records = SegmentLog::replay(&dir).await.context("queue replay failed")?;
        let mut state = Self::create(dir, policy).await?;
        let mut dead_or_acked = std::collections::HashSet::new();
        let mut pushes = Vec::new();
        for raw in &records {
            match QueueRecord::decode(raw) {
                Ok(QueueRecord::Push { id, payload, priority, enqueue_ts_ms, visible_at_ms }) => {
                    pushes.push((id, payload, priority, enqueue_ts_ms, visible_at_ms));
                }
                Ok(QueueRecord::Ack { id }) | Ok(QueueRecord::Dead { id }) => {
                    dead_or_acked.insert(id);
                }
                Err(_) => continue,
            }
        }
        let now = now_ms();
        for (id, payload, priority, enqueue_ts_ms, visible_at_ms) in pushes {
            if dead_or_acked.contains(&id) {
                continue;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let msg = Message { id, payload, priority, attempts: 0, enqueue_seq: seq, enqueue_ts_ms };
            let (idx, generation) = state.arena_insert(msg);
            if visible_at_ms > now {
                state.scheduled.push(ScheduledEntry { key: Reverse((visible_at_ms, seq)), arena_idx: idx, generation });
            } else {
                state.pending.push(PendingEntry { priority, seq: Reverse(seq), arena_idx: idx, generation });
            }
        }
        Ok(state)
    }

    fn arena_insert(&mut self, msg: Message) -> (usize, u64) {
        let generation = self.next_generation;
        self.next_generation += 1;
        if let Some(idx) = self.free_slots.pop() {
            self.arena[idx] = Some((generation, msg));
            (idx, generation)
        } else {
            self.arena.push(Some((generation, msg)));
            (self.arena.len() - 1, generation)
        }
    }

    fn arena_remove(&mut self, idx: usize) -> Option<Message> {
        let slot = self.arena.get_mut(idx)?.take();
        slot.map(|(_, msg)| {
            self.free_slots.push(idx);
            msg
        })
    }

    /// Generation-checked remove: returns `None` without freeing anything if
    /// `idx` has since been reused for a different message.
    fn arena_remove_if(&mut self, idx: usize, generation: u64) -> Option<Message> {
        match self.arena.get(idx) {
            Some(Some((gen, _))) if *gen == generation => self.arena_remove(idx),
            _ => None,
        }
    }

    fn arena_get(&self, idx: usize, generation: u64) -> Option<&Message> {
        match self.arena.get(idx) {
            Some(Some((gen, msg))) if *gen == generation => Some(msg),
            _ => None,
        }
    }

    fn arena_get_mut(&mut self, idx: usize, generation: u64) -> Option<&mut Message> {
        match self.arena.get_mut(idx) {
            Some(Some((gen, msg))) if *gen == generation => Some(msg),
            _ => None,
        }
    }

    pub async fn push(&mut self, payload: Vec<u8>, priority: u8, delay_ms: Option<u64>) -> Result<String> {
        if payload.len() > self.policy.max_payload_bytes {
            return Err(BrokerError::InvalidArgument(format!(
                "payload of {} bytes exceeds max_payload_bytes {}",
                payload.len(),
                self.policy.max_payload_bytes
            )));
        }
        let now = now_ms();
        let id = Uuid::new_v4().to_string();
        let seq = self.next_seq;
        self.next_seq += 1;
        let delay = delay_ms.unwrap_or(self.policy.default_delay_ms);
        let visible_at_ms = now + delay as i64;

        self.log
            .append(&QueueRecord::Push {
                id: id.clone(),
                payload: payload.clone(),
                priority,
                enqueue_ts_ms: now,
                visible_at_ms,
            }
            .encode())
            .await
            .map_err(|_| BrokerError::Internal)?;

        let msg = Message { id: id.clone(), payload, priority, attempts: 0, enqueue_seq: seq, enqueue_ts_ms: now };
        let (idx, generation) = self.arena_insert(msg);
        if delay > 0 {
            self.scheduled.push(ScheduledEntry { key: Reverse((visible_at_ms, seq)), arena_idx: idx, generation });
        } else {
            self.pending.push(PendingEntry { priority, seq: Reverse(seq), arena_idx: idx, generation });
        }
        self.pushed += 1;
        Ok(id)
    }

    /// Push an already-failed message straight into this queue acting as a
    /// DLQ, carrying the original payload/attempts (spec.md §4.4 promotion).
    pub async fn push_dead(&mut self, original: Message, _failure_reason: String) -> Result<String> {
        let now = now_ms();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.log
            .append(&QueueRecord::Push {
                id: original.id.clone(),
                payload: original.payload.clone(),
                priority: original.priority,
                enqueue_ts_ms: original.enqueue_ts_ms,
                visible_at_ms: now,
            }
            .encode())
            .await
            .map_err(|_| BrokerError::Internal)?;
        let id = original.id.clone();
        let msg = Message {
            id: id.clone(),
            payload: original.payload,
            priority: original.priority,
            attempts: original.attempts,
            enqueue_seq: seq,
            enqueue_ts_ms: original.enqueue_ts_ms,
        };
        let (idx, generation) = self.arena_insert(msg);
        self.pending.push(PendingEntry { priority: original.priority, seq: Reverse(seq), arena_idx: idx, generation });
        self.pushed += 1;
        Ok(id)
    }

    /// Pops pending entries until a live one is found, discarding any stale
    /// entry whose arena slot was freed and possibly reused (TTL expiry)
    /// without being evicted from this heap. Returns `None` only once the
    /// heap is genuinely exhausted, so callers can stop batching safely.
    fn lease_one(&mut self) -> Option<DeliveredMessage> {
        while let Some(entry) = self.pending.pop() {
            let Some(msg) = self.arena_get(entry.arena_idx, entry.generation) else { continue };
            let handle = self.next_handle;
            self.next_handle += 1;
            let now = now_ms();
            let next_visibility_ms = now + self.policy.visibility_timeout_ms as i64;
            let delivered = DeliveredMessage { handle, payload: msg.payload.clone(), attempts: msg.attempts, priority: msg.priority };
            self.in_flight.insert(handle, InFlight { arena_idx: entry.arena_idx, generation: entry.generation, next_visibility_ms });
            return Some(delivered);
        }
        None
    }

    /// Drain up to `batch_size` pending messages into in-flight leases.
    pub fn try_consume(&mut self, batch_size: u32) -> Vec<DeliveredMessage> {
        let mut out = Vec::new();
        for _ in 0..batch_size {
            match self.lease_one() {
                Some(m) => out.push(m),
                None => break,
            }
        }
        out
    }

    /// Park a `CONSUME` whose pending heap was empty at call time.
    pub fn park(&mut self, batch_size: u32, wait_ms: u64, reply: oneshot::Sender<Result<bytes::Bytes>>) {
        self.waiters.push_back(Waiter { batch_size, deadline_ms: now_ms() + wait_ms as i64, reply });
    }

    /// Fulfill as many parked waiters as the pending heap currently allows,
    /// in arrival order.
    pub fn drain_waiters(&mut self) {
        while !self.waiters.is_empty() && !self.pending.is_empty() {
            let waiter = self.waiters.pop_front().unwrap();
            let batch = self.try_consume(waiter.batch_size);
            let _ = waiter.reply.send(Ok(encode_consume_reply(&batch)));
        }
    }

    /// Expire waiters whose `wait_ms` deadline has passed, replying with an
    /// empty batch (not an error).
    pub fn expire_waiters(&mut self) {
        let now = now_ms();
        let mut remaining = VecDeque::with_capacity(self.waiters.len());
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.deadline_ms <= now {
                let _ = waiter.reply.send(Ok(encode_consume_reply(&[])));
            } else {
                remaining.push_back(waiter);
            }
        }
        self.waiters = remaining;
    }

    pub async fn ack(&mut self, handle: u64) -> Result<()> {
        let Some(in_flight) = self.in_flight.remove(&handle) else {
            return Ok(()); // unknown handle: idempotent success, per spec.md §4.4
        };
        if let Some(msg) = self.arena_remove_if(in_flight.arena_idx, in_flight.generation) {
            self.log.append(&QueueRecord::Ack { id: msg.id }.encode()).await.map_err(|_| BrokerError::Internal)?;
            self.acked += 1;
        }
        Ok(())
    }

    /// Explicit NACK or a timeout-sweep-observed lease expiry. Returns
    /// [`FailOutcome::Dead`] when `max_retries` is exceeded so the caller can
    /// promote the message into the companion DLQ.
    pub async fn fail(&mut self, handle: u64) -> Result<FailOutcome> {
        let Some(in_flight) = self.in_flight.remove(&handle) else {
            return Ok(FailOutcome::Unknown);
        };
        let Some(msg) = self.arena_get_mut(in_flight.arena_idx, in_flight.generation) else {
            return Ok(FailOutcome::Unknown);
        };
        msg.attempts += 1;

        if msg.attempts >= self.policy.max_retries {
            let dead = self.arena_remove_if(in_flight.arena_idx, in_flight.generation).expect("message present above");
            self.log.append(&QueueRecord::Dead { id: dead.id.clone() }.encode()).await.map_err(|_| BrokerError::Internal)?;
            self.dead_lettered += 1;
            return Ok(FailOutcome::Dead(dead));
        }

        let attempts = msg.attempts;
        let seq = self.next_seq;
        self.next_seq += 1;
        let next_visibility_ms = now_ms() + self.policy.visibility_timeout_ms as i64 * attempts as i64;
        self.scheduled.push(ScheduledEntry {
            key: Reverse((next_visibility_ms, seq)),
            arena_idx: in_flight.arena_idx,
            generation: in_flight.generation,
        });
        Ok(FailOutcome::Rescheduled)
    }

    /// Sweep in-flight leases whose visibility window has passed, treating
    /// each as an implicit timeout-nack.
    pub async fn sweep_timed_out_leases(&mut self) -> Vec<FailOutcome> {
        let now = now_ms();
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, lease)| lease.next_visibility_ms <= now)
            .map(|(handle, _)| *handle)
            .collect();
        let mut outcomes = Vec::with_capacity(expired.len());
        for handle in expired {
            if let Ok(outcome) = self.fail(handle).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Promote every scheduled entry whose visibility timestamp has arrived
    /// (first-time delay or retry back-off) into the pending heap.
    pub fn promote_scheduled(&mut self) {
        let now = now_ms();
        while let Some(entry) = self.scheduled.peek() {
            if entry.key.0.0 > now {
                break;
            }
            let entry = self.scheduled.pop().unwrap();
            if let Some(msg) = self.arena_get(entry.arena_idx, entry.generation) {
                self.pending.push(PendingEntry {
                    priority: msg.priority,
                    seq: Reverse(msg.enqueue_seq),
                    arena_idx: entry.arena_idx,
                    generation: entry.generation,
                });
            }
        }
    }

    /// Discard messages past the queue's TTL policy, wherever they currently
    /// sit (pending or scheduled); expiry is not a failure and never DLQs.
    /// Leased (in-flight) messages are left alone — the stale `PendingEntry`/
    /// `ScheduledEntry` this frees is harmless: its generation no longer
    /// matches the slot, so `lease_one`/`promote_scheduled` discard it
    /// instead of aliasing whatever message the slot is reused for next.
    pub fn expire_ttl(&mut self) {
        let Some(ttl_ms) = self.policy.ttl_ms else { return };
        let now = now_ms();
        let leased: std::collections::HashSet<usize> = self.in_flight.values().map(|lease| lease.arena_idx).collect();
        let expired_idx: Vec<usize> = self
            .arena
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                slot.as_ref()
                    .filter(|(_, m)| !leased.contains(&idx) && now - m.enqueue_ts_ms > ttl_ms as i64)
                    .map(|_| idx)
            })
            .collect();
        for idx in expired_idx {
            self.arena_remove(idx);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn inflight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Admin-only read of one message state bucket, sorted by enqueue order.
    /// Never touches the log or mutates delivery state.
    pub fn peek_messages(&self, filter: super::types::MessageStateFilter, offset: usize, limit: usize) -> (Vec<super::types::MessageRow>, usize) {
        use super::types::MessageStateFilter;
        let mut indices: Vec<usize> = match filter {
            MessageStateFilter::Pending => self.pending.iter().map(|e| e.arena_idx).collect(),
            MessageStateFilter::Scheduled => self.scheduled.iter().map(|e| e.arena_idx).collect(),
            MessageStateFilter::InFlight => self.in_flight.values().map(|lease| lease.arena_idx).collect(),
        };
        indices.sort_by_key(|idx| self.arena.get(*idx).and_then(|s| s.as_ref()).map(|(_, m)| m.enqueue_seq).unwrap_or(u64::MAX));
        let total = indices.len();
        let rows = indices
            .into_iter()
            .filter_map(|idx| self.arena.get(idx).and_then(|s| s.as_ref()).map(|(_, m)| m))
            .skip(offset)
            .take(limit)
            .map(|m| super::types::MessageRow {
                id: m.id.clone(),
                payload: m.payload.clone(),
                priority: m.priority,
                attempts: m.attempts,
                enqueue_ts_ms: m.enqueue_ts_ms,
            })
            .collect();
        (rows, total)
    }

    pub async fn flush(&mut self) -> anyhow::Result<()> {
        self.log.flush().await
    }

    pub fn has_unflushed_writes(&self) -> bool {
        self.log.has_unflushed_writes()
    }
}

