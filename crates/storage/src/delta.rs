use super::ids::MessageId;
use super::types::MessageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Added,
    Modified,
    Removed,
}

impl DeltaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// One discrete change to a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Added(MessageRecord),
    Modified(MessageRecord),
    Removed(MessageId),
}

impl Delta {
    pub fn kind(&self) -> DeltaKind {
        match self {
            Self::Added(_) => DeltaKind::Added,
            Self::Modified(_) => DeltaKind::Modified,
            Self::Removed(_) => DeltaKind::Removed,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Added(record) | Self::Modified(record) => &record.id,
            Self::Removed(message_id) => message_id,
        }
    }
}

/// Non-empty, ordered group of deltas delivered by one feed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaBatch(Vec<Delta>);

impl DeltaBatch {
    /// Returns `None` for an empty sequence; feeds never deliver empty batches.
    pub fn new(deltas: Vec<Delta>) -> Option<Self> {
        if deltas.is_empty() {
            None
        } else {
            Some(Self(deltas))
        }
    }

    pub fn single(delta: Delta) -> Self {
        Self(vec![delta])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Delta> {
        self.0.iter()
    }

    pub fn into_deltas(self) -> Vec<Delta> {
        self.0
    }
}

impl IntoIterator for DeltaBatch {
    type Item = Delta;
    type IntoIter = std::vec::IntoIter<Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DeltaBatch {
    type Item = &'a Delta;
    type IntoIter = std::slice::Iter<'a, Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
