use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::delta::DeltaBatch;
use super::error::StorageResult;
use super::ids::MessageId;
use super::types::{MessagePatch, NewMessage};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type FeedSender = mpsc::UnboundedSender<FeedEvent>;

/// Notification delivered on a change feed subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Batch(DeltaBatch),
    /// The feed failed; no further events follow.
    Error(String),
}

/// Receiving end of one change feed subscription.
///
/// The subscription is cancelled by [`FeedSubscription::unsubscribe`] or on drop.
/// Once cancelled, nothing further is yielded, including events that were
/// already buffered.
pub struct FeedSubscription {
    collection: String,
    events: mpsc::UnboundedReceiver<FeedEvent>,
    cancelled: bool,
}

impl FeedSubscription {
    pub fn new(collection: impl Into<String>, events: mpsc::UnboundedReceiver<FeedEvent>) -> Self {
        Self {
            collection: collection.into(),
            events,
            cancelled: false,
        }
    }

    /// Creates a subscription together with the sender that feeds it.
    pub fn channel(collection: impl Into<String>) -> (FeedSender, Self) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (event_tx, Self::new(collection, event_rx))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Waits for the next event. `None` means the feed terminated or was cancelled.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        if self.cancelled {
            return None;
        }
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FeedEvent> {
        if self.cancelled {
            return None;
        }
        self.events.try_recv().ok()
    }

    /// Returns `false` if the subscription was already cancelled.
    pub fn unsubscribe(&mut self) -> bool {
        if self.cancelled {
            return false;
        }

        self.cancelled = true;
        // Closing makes every producer observe the cancellation on its next send.
        self.events.close();
        tracing::debug!(collection = %self.collection, "change feed subscription cancelled");
        true
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Stream for FeedSubscription {
    type Item = FeedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedEvent>> {
        if self.cancelled {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

/// Subscription side of the backing store.
pub trait ChangeFeed: Send + Sync {
    /// Opens a long-lived subscription to `collection`.
    fn subscribe<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, StorageResult<FeedSubscription>>;
}

/// Write side of the backing store.
///
/// None of these operations report the resulting record; the change only
/// becomes visible through a later feed delta.
pub trait MutationGateway: Send + Sync {
    fn create<'a>(
        &'a self,
        collection: &'a str,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<()>>;

    /// Fails with `NotFound` when the message no longer exists.
    fn update<'a>(
        &'a self,
        collection: &'a str,
        message_id: &'a MessageId,
        patch: MessagePatch,
    ) -> BoxFuture<'a, StorageResult<()>>;

    /// Idempotent: deleting a missing message succeeds.
    fn delete<'a>(
        &'a self,
        collection: &'a str,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, StorageResult<()>>;
}
