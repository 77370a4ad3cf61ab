use std::fmt;
use std::str::FromStr;

use snafu::ensure;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

/// Opaque message identifier assigned by the backing store.
///
/// Stores are free to use any non-blank string. The bundled stores mint UUIDv7
/// values so identifiers are never reused within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn parse(raw: &str) -> StorageResult<Self> {
        ensure!(
            !raw.trim().is_empty(),
            InvalidIdSnafu {
                stage: "parse-message-id",
                id_type: "message-id",
                raw: raw.to_string(),
            }
        );
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for MessageId {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}
