use futures::stream::{self, Stream};
use handoff_types::CoordinationRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const DEFAULT_CAPACITY: usize = 64;

/// What a subscriber sees
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A committed record state
    Record(CoordinationRecord),
    /// The subscriber fell behind and dropped `missed` events. Its view may
    /// be stale; re-read the latest record from the store.
    Resync { missed: u64 },
}

/// Fan-out of committed record changes, keyed by item.
///
/// Only states already durable in the store are published, so a subscriber
/// never observes a write that later fails.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    capacity: usize,
    per_item: RwLock<HashMap<String, broadcast::Sender<CoordinationRecord>>>,
    all: broadcast::Sender<CoordinationRecord>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(FeedInner {
                capacity,
                per_item: RwLock::new(HashMap::new()),
                all,
            }),
        }
    }

    /// Publish a committed record. Returns how many item subscribers got it.
    pub async fn publish(&self, record: &CoordinationRecord) -> usize {
        // No receivers is not an error
        let _ = self.inner.all.send(record.clone());

        let mut per_item = self.inner.per_item.write().await;
        let delivered = match per_item.get(&record.item_id) {
            Some(tx) => tx.send(record.clone()).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            per_item.remove(&record.item_id);
        }
        delivered
    }

    /// Changes for a single item
    pub async fn subscribe(&self, item_id: &str) -> FeedSubscription {
        let mut per_item = self.inner.per_item.write().await;
        let rx = per_item
            .entry(item_id.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();
        FeedSubscription { rx }
    }

    /// Changes for every item
    pub fn subscribe_all(&self) -> FeedSubscription {
        FeedSubscription {
            rx: self.inner.all.subscribe(),
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FeedSubscription {
    rx: broadcast::Receiver<CoordinationRecord>,
}

impl FeedSubscription {
    /// Next event, or `None` once the feed is dropped
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        match self.rx.recv().await {
            Ok(record) => Some(FeedEvent::Record(record)),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(FeedEvent::Resync { missed }),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Drop everything still buffered. Used after a `Resync` by consumers
    /// that rebuild their state from the store instead of replaying.
    pub fn skip_to_latest(&mut self) {
        self.rx = self.rx.resubscribe();
    }

    pub fn into_stream(self) -> impl Stream<Item = FeedEvent> {
        stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}
