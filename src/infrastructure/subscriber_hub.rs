// Subscriber hub - In-process Broadcaster with snapshot-on-join and replay
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::application::broadcaster::Broadcaster;
use crate::domain::batch::BatchId;
use crate::domain::report::{ComparisonReport, DataPoint, ResultEnvelope};

/// Messages delivered to a subscriber, tagged by `type`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// Latest envelope per batch, sent once on join.
    InitialState {
        data: BTreeMap<BatchId, ResultEnvelope>,
        timestamp: DateTime<Utc>,
    },
    /// Recent history of one batch, sent after the snapshot.
    HistoryReplay {
        batch_number: BatchId,
        history: Vec<ResultEnvelope>,
        timestamp: DateTime<Utc>,
    },
    BatchUpdate {
        batch_number: BatchId,
        data_point: DataPoint,
        comparison: ComparisonReport,
        timestamp: DateTime<Utc>,
    },
    Pong,
}

impl HubMessage {
    fn update(envelope: &ResultEnvelope) -> Self {
        HubMessage::BatchUpdate {
            batch_number: envelope.batch_id,
            data_point: envelope.data_point.clone(),
            comparison: envelope.comparison.clone(),
            timestamp: envelope.produced_at,
        }
    }
}

/// Receiving end of one subscription.
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<HubMessage>,
}

/// Snapshot, replay ring and subscriber set change together under one lock,
/// so a joiner never sees a replay newer than its snapshot.
#[derive(Default)]
struct HubInner {
    subscribers: HashMap<u64, mpsc::Sender<HubMessage>>,
    latest: BTreeMap<BatchId, ResultEnvelope>,
    /// Last `replay_window` published envelopes per batch.
    recent: BTreeMap<BatchId, VecDeque<ResultEnvelope>>,
    next_id: u64,
}

/// Fans envelopes out to per-subscriber bounded queues.
///
/// Sends never wait: a subscriber whose queue is full or closed is dropped.
#[derive(Clone)]
pub struct SubscriberHub {
    inner: Arc<Mutex<HubInner>>,
    buffer: usize,
    replay_window: usize,
}

impl SubscriberHub {
    pub fn new(buffer: usize, replay_window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner::default())),
            buffer: buffer.max(1),
            replay_window,
        }
    }

    /// Register a subscriber and queue its snapshot and replay.
    pub fn subscribe(&self) -> Subscription {
        let replay_batches = BatchId::all().count();
        let (tx, rx) = mpsc::channel(self.buffer + 1 + replay_batches);

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;

        let now = Utc::now();
        if !inner.latest.is_empty() {
            let _ = tx.try_send(HubMessage::InitialState {
                data: inner.latest.clone(),
                timestamp: now,
            });
        }
        for (batch_id, recent) in &inner.recent {
            if !recent.is_empty() {
                let _ = tx.try_send(HubMessage::HistoryReplay {
                    batch_number: *batch_id,
                    history: recent.iter().cloned().collect(),
                    timestamp: now,
                });
            }
        }

        inner.subscribers.insert(id, tx);
        tracing::info!(subscriber = id, total = inner.subscribers.len(), "Subscriber joined");

        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.subscribers.remove(&id).is_some() {
            tracing::info!(subscriber = id, total = inner.subscribers.len(), "Subscriber left");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }
}

#[async_trait]
impl Broadcaster for SubscriberHub {
    async fn publish(&self, envelopes: &[ResultEnvelope]) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for envelope in envelopes {
            inner.latest.insert(envelope.batch_id, envelope.clone());
            if self.replay_window > 0 {
                let recent = inner.recent.entry(envelope.batch_id).or_default();
                recent.push_back(envelope.clone());
                while recent.len() > self.replay_window {
                    recent.pop_front();
                }
            }
        }

        let messages: Vec<HubMessage> = envelopes.iter().map(HubMessage::update).collect();
        inner.subscribers.retain(|id, tx| {
            for message in &messages {
                match tx.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(subscriber = id, "Subscriber too slow, dropped");
                        return false;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(subscriber = id, "Subscriber closed");
                        return false;
                    }
                }
            }
            true
        });
    }
}
