pub mod delta;
pub mod error;
pub mod feed;
pub mod hub;
pub mod ids;
pub mod memory;
pub mod sqlite;
pub mod types;
pub mod wire;

pub use delta::{Delta, DeltaBatch, DeltaKind};
pub use error::{StorageError, StorageResult};
pub use feed::{
    BoxFuture, ChangeFeed, FeedEvent, FeedSender, FeedSubscription, MutationGateway,
};
pub use hub::FeedHub;
pub use ids::MessageId;
pub use memory::MemoryStore;
pub use sqlite::SqliteStorage;
pub use types::{DEFAULT_COLLECTION, MessagePatch, MessageRecord, NewMessage};
pub use wire::{WireChange, WireChangeKind, WireRecord, decode_batch};
