//! Topic trie with a side index for wildcard subscriptions (spec.md §4.6).
//!
//! Grounded on the teacher's `data::topics::mod::TopicRegistry`, which keeps
//! a flat `HashMap<String, Topic>` plus a `Publisher` per topic; generalized
//! here from flat topic names to a `/`-segmented trie so a single publish can
//! reach both its exact node and every matching wildcard subscription
//! without scanning every topic in the registry.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{BrokerError, Result};

use super::types::encode_delivery;

pub fn subscription_id(client_id: &str, pattern: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    client_id.hash(&mut hasher);
    pattern.hash(&mut hasher);
    hasher.finish()
}

pub struct Subscriber {
    pub push_sender: mpsc::Sender<Bytes>,
    pub subscription_id: u64,
}

#[derive(Default)]
struct TrieNode {
    children: HashMap<String, TrieNode>,
    subscribers: HashMap<String, Subscriber>,
    retained: Option<Vec<u8>>,
}

struct WildcardSubscription {
    pattern_segments: Vec<String>,
    pattern: String,
    client_id: String,
    push_sender: mpsc::Sender<Bytes>,
}

#[derive(Default)]
pub struct Trie {
    root: TrieNode,
    /// Keyed by the literal segments preceding the first wildcard segment
    /// (joined by `/`; empty string if the pattern starts with a wildcard).
    wildcards: HashMap<String, Vec<WildcardSubscription>>,
}

fn split(path: &str) -> Vec<String> {
    path.split('/').map(str::to_string).collect()
}

/// `#` only as the final segment; no mixing of wildcard and literal
/// characters within one segment.
fn validate_pattern(segments: &[String]) -> Result<()> {
    if segments.is_empty() || segments.iter().any(String::is_empty) {
        return Err(BrokerError::InvalidArgument("empty topic segment".into()));
    }
    for (i, seg) in segments.iter().enumerate() {
        let has_plus = seg.contains('+');
        let has_hash = seg.contains('#');
        if !has_plus && !has_hash {
            continue;
        }
        if seg != "+" && seg != "#" {
            return Err(BrokerError::InvalidArgument(format!("malformed wildcard segment '{seg}'")));
        }
        if seg == "#" && i != segments.len() - 1 {
            return Err(BrokerError::InvalidArgument("'#' is only valid as the final segment".into()));
        }
    }
    Ok(())
}

fn is_wildcard_pattern(segments: &[String]) -> bool {
    segments.iter().any(|s| s == "+" || s == "#")
}

fn prefix_key(segments: &[String]) -> String {
    segments.iter().take_while(|s| s.as_str() != "+" && s.as_str() != "#").cloned().collect::<Vec<_>>().join("/")
}

/// MQTT-style match: `+` consumes exactly one segment, `#` consumes the
/// remainder (including zero segments).
fn matches(pattern: &[String], topic: &[String]) -> bool {
    let mut pi = 0;
    let mut ti = 0;
    while pi < pattern.len() {
        if pattern[pi] == "#" {
            return true;
        }
        if ti >= topic.len() {
            return false;
        }
        if pattern[pi] == "+" || pattern[pi] == topic[ti] {
            pi += 1;
            ti += 1;
        } else {
            return false;
        }
    }
    ti == topic.len()
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `client_id` to `pattern`, returning any retained payloads
    /// that must be delivered immediately (path, value) for each matching
    /// node found at subscribe time.
    pub fn subscribe(&mut self, client_id: &str, pattern: &str, push_sender: mpsc::Sender<Bytes>) -> Result<Vec<(String, Vec<u8>)>> {
        let segments = split(pattern);
        validate_pattern(&segments)?;

        if !is_wildcard_pattern(&segments) {
            let sub_id = subscription_id(client_id, pattern);
            let node = self.node_mut(&segments);
            node.subscribers.insert(client_id.to_string(), Subscriber { push_sender, subscription_id: sub_id });
            return Ok(match &node.retained {
                Some(v) => vec![(pattern.to_string(), v.clone())],
                None => Vec::new(),
            });
        }

        let key = prefix_key(&segments);
        self.wildcards.entry(key).or_default().push(WildcardSubscription {
            pattern_segments: segments.clone(),
            pattern: pattern.to_string(),
            client_id: client_id.to_string(),
            push_sender,
        });

        let mut deliveries = Vec::new();
        self.root.collect_retained(&mut Vec::new(), &mut |path_segments, value| {
            if matches(&segments, path_segments) {
                deliveries.push((path_segments.join("/"), value.to_vec()));
            }
        });
        Ok(deliveries)
    }

    pub fn unsubscribe(&mut self, client_id: &str, pattern: &str) {
        let segments = split(pattern);
        if !is_wildcard_pattern(&segments) {
            if let Some(node) = self.node_opt_mut(&segments) {
                node.subscribers.remove(client_id);
            }
            return;
        }
        let key = prefix_key(&segments);
        if let Some(list) = self.wildcards.get_mut(&key) {
            list.retain(|w| !(w.client_id == client_id && w.pattern == pattern));
        }
    }

    /// Remove every subscription (concrete and wildcard) held by `client_id`.
    pub fn remove_client(&mut self, client_id: &str) {
        self.root.remove_client(client_id);
        for list in self.wildcards.values_mut() {
            list.retain(|w| w.client_id != client_id);
        }
    }

    /// Publish to `topic` (must be concrete). Delivers to exact subscribers
    /// and matching wildcard subscriptions; best-effort (drops on a full
    /// channel rather than retrying). If `retain`, stores (or, for an empty
    /// payload, clears) the node's retained value.
    pub fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        let segments = split(topic);
        validate_pattern(&segments)?;
        if is_wildcard_pattern(&segments) {
            return Err(BrokerError::InvalidArgument("publish topic must not contain wildcards".into()));
        }

        let node = self.node_mut(&segments);
        for sub in node.subscribers.values() {
            let frame = crate::protocol::response::encode_push(sub.subscription_id, &encode_delivery(topic, payload));
            let _ = sub.push_sender.try_send(frame);
        }
        if retain {
            if payload.is_empty() {
                node.retained = None;
            } else {
                node.retained = Some(payload.to_vec());
            }
        }

        for depth in 0..=segments.len() {
            let key = segments[..depth].join("/");
            let Some(list) = self.wildcards.get(&key) else { continue };
            for sub in list {
                if matches(&sub.pattern_segments, &segments) {
                    let frame = crate::protocol::response::encode_push(
                        subscription_id(&sub.client_id, &sub.pattern),
                        &encode_delivery(topic, payload),
                    );
                    let _ = sub.push_sender.try_send(frame);
                }
            }
        }
        Ok(())
    }

    pub fn apply_retained(&mut self, path: &str, value: Vec<u8>) {
        let segments = split(path);
        let node = self.node_mut(&segments);
        node.retained = if value.is_empty() { None } else { Some(value) };
    }

    pub fn snapshot(&self) -> (Vec<(String, u32, Option<Vec<u8>>)>, usize) {
        let mut rows = Vec::new();
        self.root.walk(&mut Vec::new(), &mut |path, node| {
            if node.retained.is_some() || !node.subscribers.is_empty() {
                rows.push((path.join("/"), node.subscribers.len() as u32, node.retained.clone()));
            }
        });
        let wildcard_count: usize = self.wildcards.values().map(|v| v.len()).sum();
        (rows, wildcard_count)
    }

    pub fn wildcard_kinds(&self) -> (u32, u32) {
        let mut multi = 0u32;
        let mut single = 0u32;
        for list in self.wildcards.values() {
            for w in list {
                if w.pattern_segments.last().map(|s| s.as_str()) == Some("#") {
                    multi += 1;
                } else {
                    single += 1;
                }
            }
        }
        (multi, single)
    }

    pub fn active_clients(&self) -> usize {
        let mut clients = std::collections::HashSet::new();
        self.root.collect_client_ids(&mut clients);
        for list in self.wildcards.values() {
            for w in list {
                clients.insert(w.client_id.clone());
            }
        }
        clients.len()
    }

    fn node_mut(&mut self, segments: &[String]) -> &mut TrieNode {
        let mut node = &mut self.root;
        for seg in segments {
            node = node.children.entry(seg.clone()).or_default();
        }
        node
    }

    fn node_opt_mut(&mut self, segments: &[String]) -> Option<&mut TrieNode> {
        let mut node = &mut self.root;
        for seg in segments {
            node = node.children.get_mut(seg)?;
        }
        Some(node)
    }
}

impl TrieNode {
    fn remove_client(&mut self, client_id: &str) {
        self.subscribers.remove(client_id);
        for child in self.children.values_mut() {
            child.remove_client(client_id);
        }
    }

    fn collect_retained(&self, path: &mut Vec<String>, f: &mut impl FnMut(&[String], &[u8])) {
        if let Some(v) = &self.retained {
            f(path, v);
        }
        for (seg, child) in &self.children {
            path.push(seg.clone());
            child.collect_retained(path, f);
            path.pop();
        }
    }

    fn collect_client_ids(&self, out: &mut std::collections::HashSet<String>) {
        for id in self.subscribers.keys() {
            out.insert(id.clone());
        }
        for child in self.children.values() {
            child.collect_client_ids(out);
        }
    }

    fn walk(&self, path: &mut Vec<String>, f: &mut impl FnMut(&[String], &TrieNode)) {
        if !path.is_empty() {
            f(path, self);
        }
        for (seg, child) in &self.children {
            path.push(seg.clone());
            child.walk(path, f);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        mpsc::channel(8)
    }

    #[test]
    fn wildcard_pattern_rejects_hash_not_in_final_position() {
        let mut trie = Trie::new();
        let (tx, _rx) = sender();
        assert!(trie.subscribe("c1", "a/#/b", tx).is_err());
    }

    #[test]
    fn plus_matches_single_segment_and_hash_matches_remainder() {
        assert!(matches(&split("home/+/light"), &split("home/kitchen/light")));
        assert!(!matches(&split("home/+/light"), &split("home/kitchen/hallway/light")));
        assert!(matches(&split("home/#"), &split("home/kitchen/light")));
        assert!(matches(&split("home/#"), &split("home")));
    }

    #[test]
    fn retained_value_delivered_to_new_concrete_subscriber() {
        let mut trie = Trie::new();
        trie.apply_retained("home/kitchen/light", b"ON".to_vec());
        let (tx, _rx) = sender();
        let deliveries = trie.subscribe("y", "home/kitchen/light", tx).unwrap();
        assert_eq!(deliveries, vec![("home/kitchen/light".to_string(), b"ON".to_vec())]);
    }

    #[test]
    fn retained_value_delivered_to_new_wildcard_subscriber() {
        let mut trie = Trie::new();
        trie.apply_retained("home/kitchen/light", b"ON".to_vec());
        let (tx, _rx) = sender();
        let deliveries = trie.subscribe("x", "home/+/light", tx).unwrap();
        assert_eq!(deliveries, vec![("home/kitchen/light".to_string(), b"ON".to_vec())]);
    }

    #[test]
    fn publish_rejects_wildcard_topic() {
        let mut trie = Trie::new();
        assert!(trie.publish("home/+/light", b"x", false).is_err());
    }

    #[test]
    fn empty_retained_payload_clears_retention() {
        let mut trie = Trie::new();
        trie.apply_retained("t", b"v".to_vec());
        trie.publish("t", b"", true).unwrap();
        let (tx, _rx) = sender();
        let deliveries = trie.subscribe("z", "t", tx).unwrap();
        assert!(deliveries.is_empty());
    }

    #[test]
    fn remove_client_drops_concrete_and_wildcard_subscriptions() {
        let mut trie = Trie::new();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        trie.subscribe("c1", "a/b", tx1).unwrap();
        trie.subscribe("c1", "a/+", tx2).unwrap();
        trie.remove_client("c1");
        assert_eq!(trie.active_clients(), 0);
    }
}
