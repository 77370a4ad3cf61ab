use std::collections::HashMap;
use std::sync::Arc;

use snafu::{OptionExt, ensure};
use tokio::sync::Mutex;

use super::delta::{Delta, DeltaBatch};
use super::error::{EmptyTextSnafu, NotFoundSnafu, StorageResult};
use super::feed::{BoxFuture, ChangeFeed, FeedEvent, FeedSubscription, MutationGateway};
use super::hub::FeedHub;
use super::ids::MessageId;
use super::types::{MessagePatch, MessageRecord, NewMessage};

#[derive(Debug, Default)]
struct MemoryState {
    // Insertion order doubles as the tie-breaker for the initial snapshot.
    collections: HashMap<String, Vec<MessageRecord>>,
    hub: FeedHub,
}

/// Process-local backing store.
///
/// Every successful write publishes exactly one delta batch to the collection's
/// subscribers while the state lock is held.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of `collection`, oldest first.
    pub async fn records(&self, collection: &str) -> Vec<MessageRecord> {
        let state = self.state.lock().await;
        state
            .collections
            .get(collection)
            .map(|records| snapshot_order(records))
            .unwrap_or_default()
    }

    pub async fn subscriber_count(&self, collection: &str) -> usize {
        self.state.lock().await.hub.subscriber_count(collection)
    }

    /// Terminates every subscription on `collection` with a feed error.
    pub async fn disconnect(&self, collection: &str, reason: &str) {
        self.state.lock().await.hub.fail(collection, reason);
    }
}

impl ChangeFeed for MemoryStore {
    fn subscribe<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, StorageResult<FeedSubscription>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let snapshot = state
                .collections
                .get(collection)
                .map(|records| snapshot_order(records))
                .unwrap_or_default();
            let (sender, subscription) = state.hub.register(collection);

            let initial = snapshot.into_iter().map(Delta::Added).collect::<Vec<_>>();
            if let Some(batch) = DeltaBatch::new(initial) {
                let _ = sender.send(FeedEvent::Batch(batch));
            }

            tracing::info!(collection, "memory store subscription opened");
            Ok(subscription)
        })
    }
}

impl MutationGateway for MemoryStore {
    fn create<'a>(
        &'a self,
        collection: &'a str,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            ensure!(
                !input.text.trim().is_empty(),
                EmptyTextSnafu {
                    stage: "memory-create-validate",
                }
            );

            let record = MessageRecord::new(
                MessageId::new_v7(),
                input.text,
                input.created_at_unix_millis,
            );
            let mut state = self.state.lock().await;
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(record.clone());
            tracing::debug!(collection, message_id = %record.id, "memory store created message");
            state
                .hub
                .publish(collection, DeltaBatch::single(Delta::Added(record)));
            Ok(())
        })
    }

    fn update<'a>(
        &'a self,
        collection: &'a str,
        message_id: &'a MessageId,
        patch: MessagePatch,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let record = state
                .collections
                .get_mut(collection)
                .and_then(|records| records.iter_mut().find(|record| record.id == *message_id))
                .context(NotFoundSnafu {
                    stage: "memory-update-lookup",
                    entity: "message",
                    id: message_id.to_string(),
                })?;
            record.text = patch.text;
            let updated = record.clone();
            state
                .hub
                .publish(collection, DeltaBatch::single(Delta::Modified(updated)));
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        collection: &'a str,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let removed = match state.collections.get_mut(collection) {
                Some(records) => {
                    let before = records.len();
                    records.retain(|record| record.id != *message_id);
                    records.len() != before
                }
                None => false,
            };

            if removed {
                state.hub.publish(
                    collection,
                    DeltaBatch::single(Delta::Removed(message_id.clone())),
                );
            } else {
                tracing::debug!(collection, message_id = %message_id, "delete of missing message ignored");
            }
            Ok(())
        })
    }
}

fn snapshot_order(records: &[MessageRecord]) -> Vec<MessageRecord> {
    let mut ordered = records.to_vec();
    ordered.sort_by_key(|record| record.created_at_unix_millis);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = "messages";

    async fn next_batch(subscription: &mut FeedSubscription) -> Vec<Delta> {
        match subscription.recv().await {
            Some(FeedEvent::Batch(batch)) => batch.into_deltas(),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscription_starts_with_existing_messages_oldest_first() {
        let store = MemoryStore::new();
        store
            .create(COLLECTION, NewMessage::new("later", 200))
            .await
            .expect("create later");
        store
            .create(COLLECTION, NewMessage::new("earlier", 100))
            .await
            .expect("create earlier");

        let mut subscription = store.subscribe(COLLECTION).await.expect("subscribe");
        let texts = next_batch(&mut subscription)
            .await
            .into_iter()
            .map(|delta| match delta {
                Delta::Added(record) => record.text,
                other => panic!("expected added, got {other:?}"),
            })
            .collect::<Vec<_>>();

        assert_eq!(texts, vec!["earlier".to_string(), "later".to_string()]);
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn every_write_publishes_one_delta() {
        let store = MemoryStore::new();
        let mut subscription = store.subscribe(COLLECTION).await.expect("subscribe");

        store
            .create(COLLECTION, NewMessage::new("hi", 100))
            .await
            .expect("create");
        let added = next_batch(&mut subscription).await;
        let Some(Delta::Added(record)) = added.first().cloned() else {
            panic!("expected added delta, got {added:?}");
        };
        assert_eq!(record.text, "hi");
        assert_eq!(record.created_at_unix_millis, 100);

        store
            .update(COLLECTION, &record.id, MessagePatch::text("hey"))
            .await
            .expect("update");
        assert_eq!(
            next_batch(&mut subscription).await,
            vec![Delta::Modified(MessageRecord::new(record.id.clone(), "hey", 100))]
        );

        store.delete(COLLECTION, &record.id).await.expect("delete");
        assert_eq!(
            next_batch(&mut subscription).await,
            vec![Delta::Removed(record.id.clone())]
        );
        assert!(store.records(COLLECTION).await.is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_message_is_not_found() {
        let store = MemoryStore::new();
        let error = store
            .update(COLLECTION, &MessageId::new_v7(), MessagePatch::text("x"))
            .await
            .expect_err("missing message");
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_silent_for_missing_ids() {
        let store = MemoryStore::new();
        let mut subscription = store.subscribe(COLLECTION).await.expect("subscribe");

        store
            .delete(COLLECTION, &MessageId::new_v7())
            .await
            .expect("delete missing");
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let store = MemoryStore::new();
        let result = store.create(COLLECTION, NewMessage::new("", 1)).await;
        assert!(matches!(
            result,
            Err(crate::StorageError::EmptyText { .. })
        ));
        assert!(store.records(COLLECTION).await.is_empty());
    }

    #[tokio::test]
    async fn dropped_subscriptions_stop_counting() {
        let store = MemoryStore::new();
        let subscription = store.subscribe(COLLECTION).await.expect("subscribe");
        assert_eq!(store.subscriber_count(COLLECTION).await, 1);

        drop(subscription);
        assert_eq!(store.subscriber_count(COLLECTION).await, 0);
    }
}
