//! Ordered local mirror of one remote collection.
//!
//! The replica only changes through [`Replica::apply`]. Records are kept
//! ordered newest first; records with equal timestamps keep the order in which
//! they first arrived, so equal-timestamp rows never swap places on screen.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use murmur_storage::{Delta, MessageId, MessageRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    newest_first: Reverse<i64>,
    arrival: u64,
}

/// Effect of applying one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Replaced,
    /// `Modified` for an id the replica had not seen.
    ImplicitlyAdded,
    Removed,
    /// `Removed` for an id the replica does not hold.
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct Replica {
    ordered: BTreeMap<SortKey, MessageRecord>,
    index: HashMap<MessageId, SortKey>,
    next_arrival: u64,
    revision: u64,
}

impl Replica {
    /// Creates an empty replica.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one delta. Never fails: inconsistent deltas degrade to upserts or no-ops.
    pub fn apply(&mut self, delta: Delta) -> Applied {
        let applied = match delta {
            Delta::Added(record) => match self.upsert(record) {
                Upsert::Inserted => Applied::Inserted,
                Upsert::Replaced => Applied::Replaced,
            },
            Delta::Modified(record) => match self.upsert(record) {
                Upsert::Inserted => Applied::ImplicitlyAdded,
                Upsert::Replaced => Applied::Replaced,
            },
            Delta::Removed(message_id) => match self.index.remove(&message_id) {
                Some(key) => {
                    self.ordered.remove(&key);
                    Applied::Removed
                }
                None => Applied::Ignored,
            },
        };

        if applied != Applied::Ignored {
            self.revision = self.revision.wrapping_add(1);
        }
        applied
    }

    /// Applies deltas in the given order.
    pub fn apply_batch<I>(&mut self, deltas: I) -> usize
    where
        I: IntoIterator<Item = Delta>,
    {
        deltas
            .into_iter()
            .map(|delta| self.apply(delta))
            .filter(|applied| *applied != Applied::Ignored)
            .count()
    }

    /// Records ordered by creation time, newest first.
    pub fn view(&self) -> Vec<MessageRecord> {
        self.ordered.values().cloned().collect()
    }

    /// Borrowing iterator in view order.
    pub fn iter(&self) -> impl Iterator<Item = &MessageRecord> {
        self.ordered.values()
    }

    /// Looks up one record by id.
    pub fn get(&self, message_id: &MessageId) -> Option<&MessageRecord> {
        self.index
            .get(message_id)
            .and_then(|key| self.ordered.get(key))
    }

    /// Returns whether `message_id` is currently mirrored.
    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.index.contains_key(message_id)
    }

    /// Number of mirrored records.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Increases every time an applied delta changes the record set.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn upsert(&mut self, record: MessageRecord) -> Upsert {
        let newest_first = Reverse(record.created_at_unix_millis);

        match self.index.get(&record.id).copied() {
            Some(previous) => {
                // Replacements keep their original arrival rank.
                let key = SortKey {
                    newest_first,
                    arrival: previous.arrival,
                };
                self.ordered.remove(&previous);
                self.index.insert(record.id.clone(), key);
                self.ordered.insert(key, record);
                Upsert::Replaced
            }
            None => {
                let key = SortKey {
                    newest_first,
                    arrival: self.next_arrival,
                };
                self.next_arrival += 1;
                self.index.insert(record.id.clone(), key);
                self.ordered.insert(key, record);
                Upsert::Inserted
            }
        }
    }
}

enum Upsert {
    Inserted,
    Replaced,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> MessageId {
        MessageId::parse(raw).expect("valid id")
    }

    fn record(raw_id: &str, text: &str, created_at: i64) -> MessageRecord {
        MessageRecord::new(id(raw_id), text, created_at)
    }

    fn texts(replica: &Replica) -> Vec<String> {
        replica.iter().map(|record| record.text.clone()).collect()
    }

    #[test]
    fn batches_build_the_expected_view() {
        let mut replica = Replica::new();

        replica.apply_batch([Delta::Added(record("1", "hi", 100))]);
        assert_eq!(replica.view(), vec![record("1", "hi", 100)]);

        replica.apply_batch([Delta::Added(record("2", "yo", 200))]);
        assert_eq!(
            replica.view(),
            vec![record("2", "yo", 200), record("1", "hi", 100)]
        );

        replica.apply_batch([Delta::Removed(id("1"))]);
        assert_eq!(replica.view(), vec![record("2", "yo", 200)]);
    }

    #[test]
    fn application_order_decides_the_outcome() {
        let mut forward = Replica::new();
        forward.apply(Delta::Added(record("a", "x", 100)));
        forward.apply_batch([
            Delta::Modified(record("a", "y", 100)),
            Delta::Removed(id("a")),
        ]);
        assert!(forward.is_empty());

        let mut reversed = Replica::new();
        reversed.apply(Delta::Added(record("a", "x", 100)));
        assert_eq!(reversed.apply(Delta::Removed(id("a"))), Applied::Removed);
        assert_eq!(
            reversed.apply(Delta::Modified(record("a", "y", 100))),
            Applied::ImplicitlyAdded
        );
        assert_eq!(reversed.view(), vec![record("a", "y", 100)]);
    }

    #[test]
    fn add_then_remove_in_one_batch_nets_to_absent() {
        let mut replica = Replica::new();
        let changed = replica.apply_batch([
            Delta::Added(record("1", "hi", 100)),
            Delta::Removed(id("1")),
        ]);
        assert_eq!(changed, 2);
        assert!(replica.is_empty());
        assert!(!replica.contains(&id("1")));
    }

    #[test]
    fn removing_unknown_ids_is_a_no_op() {
        let mut replica = Replica::new();
        replica.apply(Delta::Added(record("1", "hi", 100)));
        let revision = replica.revision();

        assert_eq!(replica.apply(Delta::Removed(id("missing"))), Applied::Ignored);
        assert_eq!(replica.revision(), revision);
        assert_eq!(replica.len(), 1);
    }

    #[test]
    fn duplicate_added_replaces_without_duplicating() {
        let mut replica = Replica::new();
        replica.apply(Delta::Added(record("1", "first", 100)));
        assert_eq!(
            replica.apply(Delta::Added(record("1", "second", 100))),
            Applied::Replaced
        );
        assert_eq!(replica.view(), vec![record("1", "second", 100)]);
        assert_eq!(replica.get(&id("1")).map(|r| r.text.as_str()), Some("second"));
    }

    #[test]
    fn equal_timestamps_keep_first_arrival_order() {
        let mut replica = Replica::new();
        replica.apply_batch([
            Delta::Added(record("b", "first", 100)),
            Delta::Added(record("a", "second", 100)),
            Delta::Added(record("c", "third", 100)),
            Delta::Added(record("n", "newer", 150)),
        ]);
        assert_eq!(texts(&replica), vec!["newer", "first", "second", "third"]);

        // Edits do not move a record among its equal-timestamp peers.
        replica.apply(Delta::Modified(record("b", "first, edited", 100)));
        assert_eq!(
            texts(&replica),
            vec!["newer", "first, edited", "second", "third"]
        );
    }

    #[test]
    fn replacement_with_a_different_timestamp_repositions() {
        let mut replica = Replica::new();
        replica.apply_batch([
            Delta::Added(record("1", "old", 100)),
            Delta::Added(record("2", "mid", 200)),
        ]);
        replica.apply(Delta::Added(record("1", "old", 300)));
        assert_eq!(texts(&replica), vec!["old", "mid"]);
        assert_eq!(replica.len(), 2);
    }

    // Naive fold used as the reference for randomized sequences.
    fn reference_fold(deltas: &[Delta]) -> Vec<MessageRecord> {
        let mut records: Vec<MessageRecord> = Vec::new();
        for delta in deltas {
            match delta {
                Delta::Added(record) | Delta::Modified(record) => {
                    match records.iter_mut().find(|existing| existing.id == record.id) {
                        Some(existing) => *existing = record.clone(),
                        None => records.push(record.clone()),
                    }
                }
                Delta::Removed(message_id) => records.retain(|existing| existing.id != *message_id),
            }
        }
        records
    }

    #[test]
    fn randomized_sequences_match_the_reference_fold() {
        let mut seed = 0x2545_f491_u64;
        let mut next = move |bound: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound
        };

        for _ in 0..200 {
            let mut deltas = Vec::new();
            let mut replica = Replica::new();
            for step in 0..40 {
                let message_id = format!("m{}", next(8));
                let created_at = (next(4) * 100) as i64;
                let text = format!("t{step}");
                let delta = match next(3) {
                    0 => Delta::Added(record(&message_id, &text, created_at)),
                    1 => Delta::Modified(record(&message_id, &text, created_at)),
                    _ => Delta::Removed(id(&message_id)),
                };
                deltas.push(delta.clone());
                replica.apply(delta);
            }

            let mut expected = reference_fold(&deltas);
            let mut actual = replica.view();
            let by_id = |left: &MessageRecord, right: &MessageRecord| left.id.cmp(&right.id);
            expected.sort_by(by_id);
            actual.sort_by(by_id);
            assert_eq!(actual, expected);

            let view = replica.view();
            assert!(
                view.windows(2)
                    .all(|pair| pair[0].created_at_unix_millis >= pair[1].created_at_unix_millis)
            );
        }
    }
}
