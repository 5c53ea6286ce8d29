//! Store engine: single-writer task owning a hash map from key to entry,
//! with a time-ordered min-heap driving lazy + background TTL expiry
//! (spec.md §4.3).
//!
//! Deliberately does not reach for the teacher's `moka`-backed
//! `InMemoryCache` (`data::cache::memory`): moka's TinyLFU eviction is
//! capacity-driven and opaque, whereas spec.md mandates an explicit
//! `(expiry, key)` min-heap so expiry ordering and the "re-set invalidates
//! the old heap entry" rule are deterministic and inspectable. See
//! DESIGN.md for the dependency-drop note.

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::core::constants::DEFAULT_STORE_MAX_VALUE_BYTES;
use crate::engines::EngineRequest;
use crate::error::{BrokerError, Result};

use super::types::{
    CMD_DEL, CMD_GET, CMD_SET, Command, Entry, KeySnapshot, encode_del_reply, encode_get_reply,
    encode_set_reply, encode_snapshot,
};

const EXPIRY_TICK_INTERVAL_MS: u64 = 250;
const SNAPSHOT_COMMAND: u8 = 255;
const SNAPSHOT_PAGE_LIMIT: usize = 500;

pub struct StoreEngine {
    entries: HashMap<String, Entry>,
    /// (expiry_ms, generation, key). A generation is bumped on every `SET`
    /// so a stale heap entry for a key that has since been re-set is
    /// detected and discarded instead of wrongly evicting the new value.
    expiry_heap: BinaryHeap<Reverse<(i64, u64, String)>>,
    generations: HashMap<String, u64>,
    next_generation: u64,
    max_value_bytes: usize,
}

impl StoreEngine {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            expiry_heap: BinaryHeap::new(),
            generations: HashMap::new(),
            next_generation: 0,
            max_value_bytes: DEFAULT_STORE_MAX_VALUE_BYTES,
        }
    }

    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<EngineRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(EXPIRY_TICK_INTERVAL_MS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.expire_tick();
                }
                maybe_req = rx.recv() => {
                    match maybe_req {
                        Some(req) => self.handle(req),
                        None => break,
                    }
                }
            }
        }
    }

    fn handle(&mut self, req: EngineRequest) {
        self.expire_tick();
        let result = if req.command == SNAPSHOT_COMMAND {
            Ok(self.snapshot(0, SNAPSHOT_PAGE_LIMIT))
        } else {
            Command::decode(req.command, req.payload).and_then(|cmd| self.apply(cmd))
        };
        let _ = req.reply.send(result);
    }

    fn apply(&mut self, cmd: Command) -> Result<bytes::Bytes> {
        match cmd {
            Command::Set { key, value, ttl_ms } => {
                if value.len() > self.max_value_bytes {
                    return Err(BrokerError::InvalidArgument(format!(
                        "value of {} bytes exceeds max_value_bytes {}",
                        value.len(),
                        self.max_value_bytes
                    )));
                }
                self.set(key, value, ttl_ms);
                Ok(encode_set_reply())
            }
            Command::Get { key } => Ok(encode_get_reply(self.get(&key))),
            Command::Del { key } => Ok(encode_del_reply(self.del(&key))),
        }
    }

    fn set(&mut self, key: String, value: Vec<u8>, ttl_ms: Option<u64>) {
        let now = Utc::now().timestamp_millis();
        let generation = self.next_generation;
        self.next_generation += 1;

        let expires_at_ms = ttl_ms.map(|ttl| now + ttl as i64);
        if let Some(expiry) = expires_at_ms {
            self.expiry_heap.push(Reverse((expiry, generation, key.clone())));
        }
        self.generations.insert(key.clone(), generation);
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at_ms,
                created_at_ms: now,
            },
        );
    }

    fn get(&self, key: &str) -> Option<&[u8]> {
        let entry = self.entries.get(key)?;
        let now = Utc::now().timestamp_millis();
        match entry.expires_at_ms {
            Some(exp) if exp <= now => None,
            _ => Some(entry.value.as_slice()),
        }
    }

    fn del(&mut self, key: &str) -> bool {
        self.generations.remove(key);
        self.entries.remove(key).is_some()
    }

    /// Pop every heap entry whose expiry has passed; reclaim it from the map
    /// only if its generation still matches (i.e. the key has not been
    /// re-`SET` since this heap entry was pushed).
    fn expire_tick(&mut self) {
        let now = Utc::now().timestamp_millis();
        while let Some(Reverse((expiry, generation, key))) = self.expiry_heap.peek() {
            if *expiry > now {
                break;
            }
            let (expiry, generation, key) = (*expiry, *generation, key.clone());
            self.expiry_heap.pop();
            if self.generations.get(&key) == Some(&generation) {
                if let Some(entry) = self.entries.get(&key) {
                    if entry.expires_at_ms == Some(expiry) {
                        self.entries.remove(&key);
                        self.generations.remove(&key);
                    }
                }
            }
        }
    }

    fn snapshot(&self, offset: usize, limit: usize) -> bytes::Bytes {
        let now = Utc::now().timestamp_millis();
        let expiring_keys = self.entries.values().filter(|e| e.expires_at_ms.is_some()).count();
        let mut keys: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at_ms.map_or(true, |exp| exp > now))
            .collect();
        keys.sort_by(|a, b| a.0.cmp(b.0));
        let page: Vec<KeySnapshot> = keys
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(key, entry)| KeySnapshot {
                key: key.clone(),
                value_preview: String::from_utf8_lossy(&entry.value[..entry.value.len().min(64)]).into_owned(),
                created_at_ms: entry.created_at_ms,
                expires_at_ms: entry.expires_at_ms,
            })
            .collect();
        encode_snapshot(self.entries.len(), expiring_keys, &page)
    }
}

impl Default for StoreEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub const CMD_SNAPSHOT: u8 = SNAPSHOT_COMMAND;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn new_engine() -> StoreEngine {
        StoreEngine::new()
    }

    #[test]
    fn set_then_get_returns_value() {
        let mut engine = new_engine();
        engine.set("k".into(), b"v".to_vec(), None);
        assert_eq!(engine.get("k"), Some(b"v".as_slice()));
    }

    #[test]
    fn get_of_missing_key_is_none_not_error() {
        let engine = new_engine();
        assert_eq!(engine.get("missing"), None);
    }

    #[test]
    fn expired_entry_is_invisible_even_before_tick() {
        let mut engine = new_engine();
        engine.set("k".into(), b"v".to_vec(), Some(0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(engine.get("k"), None, "lazy expiry must hide the value before the heap tick runs");
    }

    #[test]
    fn re_set_survives_a_stale_heap_entry() {
        let mut engine = new_engine();
        engine.set("k".into(), b"v1".to_vec(), Some(0));
        engine.set("k".into(), b"v2".to_vec(), None);
        engine.expire_tick();
        assert_eq!(engine.get("k"), Some(b"v2".as_slice()));
    }

    #[test]
    fn del_reports_whether_key_existed() {
        let mut engine = new_engine();
        assert!(!engine.del("k"));
        engine.set("k".into(), b"v".to_vec(), None);
        assert!(engine.del("k"));
        assert!(!engine.del("k"));
    }

    #[test]
    fn oversized_value_is_rejected() {
        let mut engine = new_engine();
        engine.max_value_bytes = 4;
        let err = engine
            .apply(Command::Set { key: "k".into(), value: vec![0u8; 5], ttl_ms: None })
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn decode_rejects_unknown_command() {
        assert!(Command::decode(250, Bytes::new()).is_err());
        assert!(CMD_SET != CMD_GET && CMD_GET != CMD_DEL);
    }
}
