//! Consumer group coordinator: generation fencing and deterministic
//! rebalancing across a topic's partitions (spec.md §4.5).
//!
//! Grounded on the teacher's `data::topics::backend::TopicBackend` trait,
//! which already separates `stream_subscribe(topic, group, consumer)` from
//! `stream_claim`/`stream_ack`, generalized here from a single Redis-Streams
//! consumer group to a partitioned, generation-fenced one.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::core::constants::STREAM_MEMBER_HEARTBEAT_TIMEOUT_MS;
use crate::protocol::response::encode_push;

use super::types::encode_join_reply;

struct Member {
    push_sender: Option<mpsc::Sender<Bytes>>,
    last_seen_ms: i64,
}

/// Stable per-member push-frame subscription id, independent of
/// `generation_id` (which changes on every rebalance) so a client can
/// demultiplex rebalance pushes for the same membership across time.
fn member_subscription_id(client_id: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    client_id.hash(&mut hasher);
    hasher.finish()
}

pub struct ConsumerGroup {
    pub generation_id: u64,
    members: HashMap<String, Member>,
    /// partition id -> assigned member id
    assignment: HashMap<u32, String>,
    pub committed_offsets: HashMap<u32, u64>,
}

impl ConsumerGroup {
    pub fn new() -> Self {
        Self { generation_id: 0, members: HashMap::new(), assignment: HashMap::new(), committed_offsets: HashMap::new() }
    }

    pub fn is_member(&self, client_id: &str) -> bool {
        self.members.contains_key(client_id)
    }

    /// Add (or refresh) a member and rebalance. Returns this member's
    /// assignment for the `JOIN` reply.
    pub fn join(&mut self, client_id: &str, push_sender: Option<mpsc::Sender<Bytes>>, partitions: u32, now_ms: i64) -> Vec<u32> {
        self.members
            .entry(client_id.to_string())
            .and_modify(|m| {
                m.last_seen_ms = now_ms;
                if push_sender.is_some() {
                    m.push_sender = push_sender.clone();
                }
            })
            .or_insert_with(|| Member { push_sender, last_seen_ms: now_ms });
        self.rebalance(partitions);
        self.assigned_partitions(client_id)
    }

    pub fn leave(&mut self, client_id: &str, partitions: u32) {
        if self.members.remove(client_id).is_some() {
            self.rebalance(partitions);
        }
    }

    /// `FETCH` carries no client id on the wire (spec.md §6), so liveness is
    /// tracked via the partition's current owner instead of an explicit
    /// member id: a successful fetch on `partition` implies its assigned
    /// member is still alive.
    pub fn touch_partition_owner(&mut self, partition: u32, now_ms: i64) {
        if let Some(owner) = self.assignment.get(&partition).cloned() {
            if let Some(member) = self.members.get_mut(&owner) {
                member.last_seen_ms = now_ms;
            }
        }
    }

    /// Evict members that haven't been seen within the heartbeat timeout;
    /// returns whether a rebalance is needed.
    pub fn evict_stale(&mut self, now_ms: i64, partitions: u32) -> bool {
        let stale: Vec<String> = self
            .members
            .iter()
            .filter(|(_, m)| now_ms - m.last_seen_ms > STREAM_MEMBER_HEARTBEAT_TIMEOUT_MS as i64)
            .map(|(id, _)| id.clone())
            .collect();
        if stale.is_empty() {
            return false;
        }
        for id in stale {
            self.members.remove(&id);
        }
        self.rebalance(partitions);
        true
    }

    fn rebalance(&mut self, partitions: u32) {
        self.generation_id += 1;
        self.assignment.clear();
        let mut sorted_members: Vec<&String> = self.members.keys().collect();
        sorted_members.sort();
        if !sorted_members.is_empty() {
            for partition in 0..partitions {
                let member = sorted_members[partition as usize % sorted_members.len()].clone();
                self.assignment.insert(partition, member);
            }
        }
        self.broadcast_assignment();
    }

    fn assigned_partitions(&self, client_id: &str) -> Vec<u32> {
        let mut assigned: Vec<u32> =
            self.assignment.iter().filter(|(_, member)| member.as_str() == client_id).map(|(p, _)| *p).collect();
        assigned.sort();
        assigned
    }

    fn broadcast_assignment(&self) {
        for (client_id, member) in &self.members {
            let Some(sender) = &member.push_sender else { continue };
            let assigned = self.assigned_partitions(client_id);
            let payload = encode_join_reply(self.generation_id, &assigned);
            let frame = encode_push(member_subscription_id(client_id), &payload);
            let _ = sender.try_send(frame);
        }
    }

    pub fn commit(&mut self, generation_id: u64, partition: u32, next_offset: u64) -> Result<(), crate::error::BrokerError> {
        if generation_id < self.generation_id {
            return Err(crate::error::BrokerError::RebalanceNeeded);
        }
        let current = self.committed_offsets.get(&partition).copied().unwrap_or(0);
        if next_offset > current {
            self.committed_offsets.insert(partition, next_offset);
        }
        Ok(())
    }

    pub fn committed_offset(&self, partition: u32) -> u64 {
        self.committed_offsets.get(&partition).copied().unwrap_or(0)
    }

    /// Advance a committed offset forward to `floor` if it currently sits
    /// below it (called by retention when records are dropped).
    pub fn advance_floor(&mut self, partition: u32, floor: u64) {
        let current = self.committed_offsets.get(&partition).copied().unwrap_or(0);
        if floor > current {
            self.committed_offsets.insert(partition, floor);
        }
    }
}

impl Default for ConsumerGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_assignment_is_deterministic_by_sorted_member_id() {
        let mut group = ConsumerGroup::new();
        group.join("b", None, 4, 0);
        group.join("a", None, 4, 0);
        assert_eq!(group.assigned_partitions("a"), vec![0, 2]);
        assert_eq!(group.assigned_partitions("b"), vec![1, 3]);
    }

    #[test]
    fn commit_below_current_is_dropped() {
        let mut group = ConsumerGroup::new();
        group.join("a", None, 1, 0);
        group.commit(group.generation_id, 0, 10).unwrap();
        group.commit(group.generation_id, 0, 5).unwrap();
        assert_eq!(group.committed_offset(0), 10);
    }

    #[test]
    fn commit_with_stale_generation_is_rejected() {
        let mut group = ConsumerGroup::new();
        group.join("a", None, 1, 0);
        let stale_gen = group.generation_id;
        group.join("b", None, 1, 0);
        assert!(group.commit(stale_gen, 0, 1).is_err());
    }

    #[test]
    fn leave_triggers_rebalance_and_frees_partitions() {
        let mut group = ConsumerGroup::new();
        group.join("a", None, 2, 0);
        group.join("b", None, 2, 0);
        group.leave("b", 2);
        assert_eq!(group.assigned_partitions("a"), vec![0, 1]);
    }
}
