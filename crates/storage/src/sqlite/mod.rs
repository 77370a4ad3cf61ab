use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;

use super::delta::{Delta, DeltaBatch};
use super::error::{
    CreateSqliteDirectorySnafu, EmptyTextSnafu, InvariantViolationSnafu, NotFoundSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, StorageResult,
};
use super::feed::{BoxFuture, ChangeFeed, FeedEvent, FeedSubscription, MutationGateway};
use super::hub::FeedHub;
use super::ids::MessageId;
use super::types::{MessagePatch, MessageRecord, NewMessage};

/// SQLite-backed store.
///
/// Writes and subscription snapshots serialize on the hub lock, so every
/// subscriber sees its initial snapshot strictly before any later change.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    hub: Arc<Mutex<FeedHub>>,
}

#[derive(Debug, Clone, FromRow)]
struct MessageRow {
    id: String,
    text: String,
    created_at: i64,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        // A single long-lived connection keeps `:memory:` databases alive for the pool's lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        tracing::info!(database_url = %database_url, "opened sqlite message store");
        Ok(Self {
            pool,
            hub: Arc::new(Mutex::new(FeedHub::new())),
        })
    }

    /// Current contents of `collection`, oldest first.
    pub async fn list_messages(&self, collection: &str) -> StorageResult<Vec<MessageRecord>> {
        load_collection(&self.pool, collection, "sqlite-list-messages").await
    }

    /// Terminates every subscription on `collection` with a feed error.
    pub async fn disconnect(&self, collection: &str, reason: &str) {
        self.hub.lock().await.fail(collection, reason);
    }

    async fn load_message(
        &self,
        collection: &str,
        message_id: &MessageId,
        stage: &'static str,
    ) -> StorageResult<Option<MessageRecord>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT id, text, created_at FROM messages WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(message_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu { stage })?;

        row.map(message_row_to_record).transpose()
    }
}

impl ChangeFeed for SqliteStorage {
    fn subscribe<'a>(&'a self, collection: &'a str) -> BoxFuture<'a, StorageResult<FeedSubscription>> {
        Box::pin(async move {
            let mut hub = self.hub.lock().await;
            let snapshot = load_collection(&self.pool, collection, "sqlite-subscribe-snapshot").await?;
            let (sender, subscription) = hub.register(collection);

            let initial = snapshot.into_iter().map(Delta::Added).collect::<Vec<_>>();
            if let Some(batch) = DeltaBatch::new(initial) {
                let _ = sender.send(FeedEvent::Batch(batch));
            }

            tracing::info!(collection, "sqlite store subscription opened");
            Ok(subscription)
        })
    }
}

impl MutationGateway for SqliteStorage {
    fn create<'a>(
        &'a self,
        collection: &'a str,
        input: NewMessage,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            ensure!(
                !input.text.trim().is_empty(),
                EmptyTextSnafu {
                    stage: "sqlite-create-validate",
                }
            );

            let mut hub = self.hub.lock().await;
            let message_id = MessageId::new_v7();
            sqlx::query("INSERT INTO messages (id, collection, text, created_at) VALUES (?, ?, ?, ?)")
                .bind(message_id.as_str())
                .bind(collection)
                .bind(input.text.as_str())
                .bind(input.created_at_unix_millis)
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "sqlite-create-insert",
                })?;

            let record = MessageRecord::new(message_id, input.text, input.created_at_unix_millis);
            tracing::debug!(collection, message_id = %record.id, "sqlite store created message");
            hub.publish(collection, DeltaBatch::single(Delta::Added(record)));
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
            let mut hub = self.hub.lock().await;
            let update_result =
                sqlx::query("UPDATE messages SET text = ? WHERE collection = ? AND id = ?")
                    .bind(patch.text.as_str())
                    .bind(collection)
                    .bind(message_id.as_str())
                    .execute(&self.pool)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "sqlite-update-apply",
                    })?;

            if update_result.rows_affected() == 0 {
                return NotFoundSnafu {
                    stage: "sqlite-update-missing",
                    entity: "message",
                    id: message_id.to_string(),
                }
                .fail();
            }

            match self
                .load_message(collection, message_id, "sqlite-update-load")
                .await?
            {
                Some(record) => {
                    hub.publish(collection, DeltaBatch::single(Delta::Modified(record)));
                    Ok(())
                }
                None => InvariantViolationSnafu {
                    stage: "sqlite-update-reload",
                    details: format!("message '{message_id}' vanished after its update"),
                }
                .fail(),
            }
        })
    }

    fn delete<'a>(
        &'a self,
        collection: &'a str,
        message_id: &'a MessageId,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            let mut hub = self.hub.lock().await;
            let delete_result = sqlx::query("DELETE FROM messages WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(message_id.as_str())
                .execute(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "sqlite-delete-apply",
                })?;

            if delete_result.rows_affected() > 0 {
                hub.publish(
                    collection,
                    DeltaBatch::single(Delta::Removed(message_id.clone())),
                );
            }
            Ok(())
        })
    }
}

async fn load_collection(
    pool: &SqlitePool,
    collection: &str,
    stage: &'static str,
) -> StorageResult<Vec<MessageRecord>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT id, text, created_at FROM messages WHERE collection = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(collection)
    .fetch_all(pool)
    .await
    .context(SqliteQuerySnafu { stage })?;

    rows.into_iter().map(message_row_to_record).collect()
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    let id = MessageId::parse(&row.id).ok().context(InvariantViolationSnafu {
        stage: "sqlite-decode-row",
        details: format!("stored message row has a blank id '{}'", row.id),
    })?;
    Ok(MessageRecord {
        id,
        text: row.text,
        created_at_unix_millis: row.created_at,
    })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLLECTION: &str = "messages";

    async fn open_memory() -> SqliteStorage {
        SqliteStorage::open(":memory:").await.expect("open sqlite")
    }

    async fn next_deltas(subscription: &mut FeedSubscription) -> Vec<Delta> {
        match subscription.recv().await {
            Some(FeedEvent::Batch(batch)) => batch.into_deltas(),
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn database_locations_normalize_to_sqlite_urls() {
        assert_eq!(normalize_database_url(":memory:"), "sqlite::memory:");
        assert_eq!(
            normalize_database_url("sqlite://already.db"),
            "sqlite://already.db"
        );
        assert_eq!(
            normalize_database_url("/tmp/murmur/messages.db"),
            "sqlite:///tmp/murmur/messages.db"
        );
    }

    #[tokio::test]
    async fn file_databases_get_their_parent_directory() {
        let root = std::env::temp_dir().join(format!("murmur-sqlite-{}", MessageId::new_v7()));
        let location = root.join("nested").join("messages.db");
        let location = location.to_string_lossy().into_owned();

        let storage = SqliteStorage::open(&location).await.expect("open file database");
        assert!(root.join("nested").is_dir());
        assert!(storage.list_messages(COLLECTION).await.expect("list").is_empty());

        drop(storage);
        std::fs::remove_dir_all(&root).expect("remove temporary database");
    }

    #[tokio::test]
    async fn writes_flow_through_the_change_feed() {
        let storage = open_memory().await;
        let mut subscription = storage.subscribe(COLLECTION).await.expect("subscribe");

        storage
            .create(COLLECTION, NewMessage::new("hi", 100))
            .await
            .expect("create");
        let added = next_deltas(&mut subscription).await;
        let Some(Delta::Added(record)) = added.first().cloned() else {
            panic!("expected added delta, got {added:?}");
        };
        assert_eq!(record.text, "hi");

        storage
            .update(COLLECTION, &record.id, MessagePatch::text("hey"))
            .await
            .expect("update");
        assert_eq!(
            next_deltas(&mut subscription).await,
            vec![Delta::Modified(MessageRecord::new(record.id.clone(), "hey", 100))]
        );

        storage.delete(COLLECTION, &record.id).await.expect("delete");
        assert_eq!(
            next_deltas(&mut subscription).await,
            vec![Delta::Removed(record.id.clone())]
        );

        // A second delete is accepted and stays silent.
        storage.delete(COLLECTION, &record.id).await.expect("delete again");
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn late_subscribers_receive_a_snapshot_scoped_to_their_collection() {
        let storage = open_memory().await;
        storage
            .create(COLLECTION, NewMessage::new("second", 200))
            .await
            .expect("create second");
        storage
            .create(COLLECTION, NewMessage::new("first", 100))
            .await
            .expect("create first");
        storage
            .create("elsewhere", NewMessage::new("other", 50))
            .await
            .expect("create other");

        let mut subscription = storage.subscribe(COLLECTION).await.expect("subscribe");
        let texts = next_deltas(&mut subscription)
            .await
            .into_iter()
            .map(|delta| match delta {
                Delta::Added(record) => record.text,
                other => panic!("expected added, got {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(
            storage.list_messages("elsewhere").await.expect("list").len(),
            1
        );
    }

    #[tokio::test]
    async fn update_of_missing_message_is_not_found() {
        let storage = open_memory().await;
        let error = storage
            .update(COLLECTION, &MessageId::new_v7(), MessagePatch::text("x"))
            .await
            .expect_err("missing");
        assert!(error.is_not_found());
    }

    #[tokio::test]
    async fn rows_with_blank_ids_are_reported_as_corruption() {
        let storage = open_memory().await;
        sqlx::query("INSERT INTO messages (id, collection, text, created_at) VALUES ('', ?, 'x', 1)")
            .bind(COLLECTION)
            .execute(&storage.pool)
            .await
            .expect("insert corrupt row");

        let error = storage
            .list_messages(COLLECTION)
            .await
            .expect_err("corrupt row");
        assert!(matches!(error, crate::StorageError::InvariantViolation { .. }));
        assert!(storage.subscribe(COLLECTION).await.is_err());
    }

    #[tokio::test]
    async fn empty_subscription_waits_for_first_write() {
        let storage = open_memory().await;
        let mut subscription = storage.subscribe(COLLECTION).await.expect("subscribe");
        assert_eq!(subscription.try_recv(), None);

        storage.disconnect(COLLECTION, "shutting down").await;
        assert_eq!(
            subscription.recv().await,
            Some(FeedEvent::Error("shutting down".to_string()))
        );
    }
}
