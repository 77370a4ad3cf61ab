use std::collections::HashMap;

use super::delta::DeltaBatch;
use super::feed::{FeedEvent, FeedSender, FeedSubscription};

/// Per-collection registry of live change feed subscribers.
///
/// Stores keep the hub behind the same lock as their write path so that a
/// published batch is always ordered after the write it describes.
#[derive(Debug, Default)]
pub struct FeedHub {
    subscribers: HashMap<String, Vec<FeedSender>>,
}

impl FeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber. The returned sender lets the caller push an
    /// initial snapshot before any later publish reaches the subscriber.
    pub fn register(&mut self, collection: &str) -> (FeedSender, FeedSubscription) {
        let (sender, subscription) = FeedSubscription::channel(collection);
        self.subscribers
            .entry(collection.to_string())
            .or_default()
            .push(sender.clone());
        (sender, subscription)
    }

    /// Delivers `batch` to every live subscriber and returns how many received it.
    pub fn publish(&mut self, collection: &str, batch: DeltaBatch) -> usize {
        let Some(senders) = self.subscribers.get_mut(collection) else {
            return 0;
        };

        // Cancelled subscriptions close their receiver, so a failed send prunes them.
        senders.retain(|sender| sender.send(FeedEvent::Batch(batch.clone())).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            self.subscribers.remove(collection);
        }

        tracing::debug!(
            collection,
            batch_len = batch.len(),
            delivered,
            "published change feed batch"
        );
        delivered
    }

    /// Terminates every subscription on `collection` with a feed error.
    pub fn fail(&mut self, collection: &str, reason: &str) {
        if let Some(senders) = self.subscribers.remove(collection) {
            tracing::warn!(collection, reason, "terminating change feed subscribers");
            for sender in senders {
                let _ = sender.send(FeedEvent::Error(reason.to_string()));
            }
        }
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.subscribers
            .get(collection)
            .map(|senders| senders.iter().filter(|sender| !sender.is_closed()).count())
            .unwrap_or(0)
    }
}
