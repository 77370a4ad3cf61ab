use super::ids::MessageId;

/// Name of the collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "messages";

/// One chat message as observed through the change feed.
///
/// `created_at_unix_millis` is stamped once at creation and never changes;
/// edits only replace `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub text: String,
    pub created_at_unix_millis: i64,
}

impl MessageRecord {
    pub fn new(id: MessageId, text: impl Into<String>, created_at_unix_millis: i64) -> Self {
        Self {
            id,
            text: text.into(),
            created_at_unix_millis,
        }
    }
}

/// Write-path payload for a new message. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub created_at_unix_millis: i64,
}

impl NewMessage {
    pub fn new(text: impl Into<String>, created_at_unix_millis: i64) -> Self {
        Self {
            text: text.into(),
            created_at_unix_millis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePatch {
    pub text: String,
}

impl MessagePatch {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}
