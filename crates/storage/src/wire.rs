//! Decoding of backing-store change notifications.
//!
//! A notification is a JSON array of changes:
//!
//! ```json
//! [{"kind": "added", "id": "m1", "record": {"text": "hi", "createdAt": 100}},
//!  {"kind": "removed", "id": "m0"}]
//! ```

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};

use super::delta::{Delta, DeltaBatch};
use super::error::{DecodeChangeSnafu, InvalidChangeSnafu, StorageResult};
use super::ids::MessageId;
use super::types::MessageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    pub text: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireChange {
    pub kind: WireChangeKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<WireRecord>,
}

impl WireChange {
    pub fn into_delta(self) -> StorageResult<Delta> {
        let message_id = MessageId::parse(&self.id)?;

        match self.kind {
            WireChangeKind::Removed => Ok(Delta::Removed(message_id)),
            WireChangeKind::Added | WireChangeKind::Modified => {
                let record = self.record.context(InvalidChangeSnafu {
                    stage: "wire-change-record",
                    details: format!("{:?} change for '{}' carries no record", self.kind, self.id),
                })?;
                let record = MessageRecord::new(message_id, record.text, record.created_at);
                if self.kind == WireChangeKind::Added {
                    Ok(Delta::Added(record))
                } else {
                    Ok(Delta::Modified(record))
                }
            }
        }
    }
}

/// Parses one notification into a batch, preserving change order.
pub fn decode_batch(payload: &str) -> StorageResult<DeltaBatch> {
    let changes = serde_json::from_str::<Vec<WireChange>>(payload).context(DecodeChangeSnafu {
        stage: "wire-decode-batch",
    })?;

    let deltas = changes
        .into_iter()
        .map(WireChange::into_delta)
        .collect::<StorageResult<Vec<_>>>()?;

    DeltaBatch::new(deltas).context(InvalidChangeSnafu {
        stage: "wire-decode-batch-empty",
        details: "change notification contains no changes".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn decodes_mixed_batch_in_order() {
        let batch = decode_batch(
            r#"[
                {"kind": "added", "id": "1", "record": {"text": "hi", "createdAt": 100}},
                {"kind": "modified", "id": "1", "record": {"text": "hey", "createdAt": 100}},
                {"kind": "removed", "id": "1"}
            ]"#,
        )
        .expect("valid batch");

        let id = MessageId::parse("1").expect("id");
        assert_eq!(
            batch.into_deltas(),
            vec![
                Delta::Added(MessageRecord::new(id.clone(), "hi", 100)),
                Delta::Modified(MessageRecord::new(id.clone(), "hey", 100)),
                Delta::Removed(id),
            ]
        );
    }

    #[test]
    fn removed_ignores_attached_record() {
        let batch = decode_batch(
            r#"[{"kind": "removed", "id": "7", "record": {"text": "old", "createdAt": 1}}]"#,
        )
        .expect("valid batch");
        assert_eq!(
            batch.into_deltas(),
            vec![Delta::Removed(MessageId::parse("7").expect("id"))]
        );
    }

    #[test]
    fn added_without_record_is_invalid() {
        let error = decode_batch(r#"[{"kind": "added", "id": "1"}]"#).expect_err("no record");
        assert!(matches!(error, StorageError::InvalidChange { .. }));
    }

    #[test]
    fn empty_notifications_and_blank_ids_are_rejected() {
        assert!(matches!(
            decode_batch("[]"),
            Err(StorageError::InvalidChange { .. })
        ));
        assert!(matches!(
            decode_batch(r#"[{"kind": "removed", "id": " "}]"#),
            Err(StorageError::InvalidId { .. })
        ));
        assert!(matches!(
            decode_batch(r#"{"kind": "removed"}"#),
            Err(StorageError::DecodeChange { .. })
        ));
    }
}
