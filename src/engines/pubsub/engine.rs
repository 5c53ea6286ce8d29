//! PubSub engine: one task owns the topic trie and every retained-value
//! segment log (spec.md §4.6).

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

use crate::engines::EngineRequest;
use crate::error::Result;
use crate::persistence::{PersistenceMode, SegmentLog};

use super::trie::{Trie, subscription_id};
use super::types::{Command, PubSubSnapshot, RetainedRecord, TopicRow, encode_delivery, encode_empty_reply, encode_snapshot};

const SNAPSHOT_COMMAND: u8 = 255;
const FLUSH_INTERVAL_MS: u64 = 50;
const RETAINED_DIR: &str = "retained";

pub struct PubSubEngine {
    trie: Trie,
    log: Option<SegmentLog>,
}

impl PubSubEngine {
    pub async fn boot(root: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut trie = Trie::new();
        let log = match root {
            Some(root) => {
                let dir = root.join(RETAINED_DIR);
                let records = SegmentLog::replay(&dir).await?;
                for raw in records {
                    match RetainedRecord::decode(&raw) {
                        Ok(record) => trie.apply_retained(&record.path, record.value),
                        Err(err) => warn!(error = %err, "skipping corrupt retained record"),
                    }
                }
                Some(SegmentLog::open(dir, PersistenceMode::FileAsync).await?)
            }
            None => None,
        };
        Ok(Self { trie, log })
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_millis(FLUSH_INTERVAL_MS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.flush_if_needed().await;
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

    async fn flush_if_needed(&mut self) {
        if let Some(log) = &mut self.log {
            if log.has_unflushed_writes() {
                if let Err(err) = log.flush().await {
                    warn!(error = %err, "pubsub retained-value flush failed");
                }
            }
        }
    }

    async fn handle(&mut self, req: EngineRequest) {
        if req.command == SNAPSHOT_COMMAND {
            let _ = req.reply.send(Ok(self.snapshot()));
            return;
        }
        match Command::decode(req.command, req.payload) {
            Ok(cmd) => self.apply(cmd, req.push_sender, req.reply).await,
            Err(err) => {
                let _ = req.reply.send(Err(err));
            }
        }
    }

    async fn apply(&mut self, cmd: Command, push_sender: Option<mpsc::Sender<Bytes>>, reply: oneshot::Sender<Result<Bytes>>) {
        match cmd {
            Command::Subscribe { client_id, pattern } => {
                let outcome = match push_sender {
                    Some(sender) => match self.trie.subscribe(&client_id, &pattern, sender.clone()) {
                        Ok(deliveries) => {
                            let sub_id = subscription_id(&client_id, &pattern);
                            for (path, value) in deliveries {
                                let frame = crate::protocol::response::encode_push(sub_id, &encode_delivery(&path, &value));
                                let _ = sender.try_send(frame);
                            }
                            Ok(encode_empty_reply())
                        }
                        Err(err) => Err(err),
                    },
                    None => Err(crate::error::BrokerError::InvalidArgument("subscribe requires a push channel".into())),
                };
                let _ = reply.send(outcome);
            }
            Command::Unsubscribe { client_id, pattern } => {
                self.trie.unsubscribe(&client_id, &pattern);
                let _ = reply.send(Ok(encode_empty_reply()));
            }
            Command::Publish { topic, payload, retain } => {
                let outcome = self.trie.publish(&topic, &payload, retain).map(|()| encode_empty_reply());
                if retain && outcome.is_ok() {
                    self.persist_retained(&topic, &payload).await;
                }
                let _ = reply.send(outcome);
            }
            Command::DisconnectClient { client_id } => {
                self.trie.remove_client(&client_id);
                let _ = reply.send(Ok(encode_empty_reply()));
            }
        }
    }

    async fn persist_retained(&mut self, topic: &str, payload: &[u8]) {
        let Some(log) = &mut self.log else { return };
        let record = RetainedRecord { path: topic.to_string(), value: payload.to_vec() };
        if let Err(err) = log.append(&record.encode()).await {
            warn!(error = %err, "failed to persist retained value");
        }
    }

    fn snapshot(&self) -> Bytes {
        let (rows, _) = self.trie.snapshot();
        let (multi_level_wildcards, single_level_wildcards) = self.trie.wildcard_kinds();
        let topics: Vec<TopicRow> =
            rows.into_iter().map(|(full_path, subscribers, retained_value)| TopicRow { full_path, subscribers, retained_value }).collect();
        encode_snapshot(&PubSubSnapshot {
            active_clients: self.trie.active_clients() as u32,
            total_topics: topics.len() as u32,
            topics,
            multi_level_wildcards,
            single_level_wildcards,
        })
    }
}

pub const CMD_SNAPSHOT: u8 = SNAPSHOT_COMMAND;
