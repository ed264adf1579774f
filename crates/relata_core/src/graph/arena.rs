//! Index-based record storage for one context.
//!
//! Relationship fields hold [`RecordKey`]s into the arena rather than
//! owning their targets, so parent/child cycles never form ownership cycles.

use crate::record::RecordKey;
use crate::schema::Cardinality;
use crate::types::RowId;
use relata_codec::Value;
use std::collections::BTreeMap;

/// Where a record is in its context's unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    PendingInsert,
    Committed,
    PendingUpdate,
    PendingDelete,
}

/// How a record entered the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Passed to `insert` by the caller.
    Direct,
    /// Reached through a relationship of an inserted record.
    DeepInsert,
    /// Loaded from the store.
    Fetched,
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) entity: String,
    /// Persisted and transient attribute values.
    pub(crate) attributes: BTreeMap<String, Value>,
    /// To-one fields hold at most one key.
    pub(crate) relations: BTreeMap<String, Vec<RecordKey>>,
    /// Related rows that no longer exist in the store.
    pub(crate) dangling: BTreeMap<String, Vec<RowId>>,
    pub(crate) state: EntryState,
    pub(crate) origin: Origin,
    /// The row was first registered by a direct insert, in this context or
    /// in the one that saved it.
    pub(crate) inserted_directly: bool,
    pub(crate) row: Option<RowId>,
    /// Deleted through a predicate; cascades regardless of origin.
    pub(crate) bulk_delete: bool,
}

impl Entry {
    pub(crate) fn new(entity: impl Into<String>, origin: Origin) -> Self {
        Self {
            entity: entity.into(),
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
            dangling: BTreeMap::new(),
            state: EntryState::PendingInsert,
            origin,
            inserted_directly: origin == Origin::Direct,
            row: None,
            bulk_delete: false,
        }
    }

    pub(crate) fn related(&self, field: &str) -> &[RecordKey] {
        self.relations.get(field).map_or(&[], Vec::as_slice)
    }

    /// Adds `target` to `field`, replacing any to-one partner. Returns the
    /// partner that was replaced.
    pub(crate) fn attach(
        &mut self,
        field: &str,
        target: RecordKey,
        cardinality: Cardinality,
    ) -> Option<RecordKey> {
        let slot = self.relations.entry(field.to_string()).or_default();
        match cardinality {
            Cardinality::One => {
                let previous = slot.first().copied().filter(|k| *k != target);
                slot.clear();
                slot.push(target);
                self.dangling.remove(field);
                previous
            }
            Cardinality::Many => {
                if !slot.contains(&target) {
                    slot.push(target);
                }
                None
            }
        }
    }

    /// Removes `target` from `field`. Returns whether it was present.
    pub(crate) fn detach(&mut self, field: &str, target: RecordKey) -> bool {
        let Some(slot) = self.relations.get_mut(field) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|k| *k != target);
        before != slot.len()
    }

    /// Marks a committed record as having unsaved changes.
    pub(crate) fn touch(&mut self) {
        if self.state == EntryState::Committed {
            self.state = EntryState::PendingUpdate;
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state != EntryState::Committed
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Live(Entry),
    /// Collapsed into another record by a unique-key upsert.
    Merged(RecordKey),
    /// Deleted, or discarded by rollback before it was ever saved.
    Removed(Entry),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
}

impl Arena {
    pub(crate) fn push(&mut self, entry: Entry) -> RecordKey {
        self.slots.push(Slot::Live(entry));
        RecordKey(self.slots.len() - 1)
    }

    /// Follows merge redirects to the surviving key.
    pub(crate) fn resolve(&self, key: RecordKey) -> RecordKey {
        let mut current = key;
        // merges always point forward, so the chain is finite
        while let Some(Slot::Merged(next)) = self.slots.get(current.0) {
            current = *next;
        }
        current
    }

    pub(crate) fn slot(&self, key: RecordKey) -> Option<&Slot> {
        self.slots.get(self.resolve(key).0)
    }

    pub(crate) fn get(&self, key: RecordKey) -> Option<&Entry> {
        match self.slot(key) {
            Some(Slot::Live(entry)) => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: RecordKey) -> Option<&mut Entry> {
        let index = self.resolve(key).0;
        match self.slots.get_mut(index) {
            Some(Slot::Live(entry)) => Some(entry),
            _ => None,
        }
    }

    /// A live or removed entry; attributes of deleted records stay readable.
    pub(crate) fn any(&self, key: RecordKey) -> Option<&Entry> {
        match self.slot(key) {
            Some(Slot::Live(entry) | Slot::Removed(entry)) => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn is_live(&self, key: RecordKey) -> bool {
        self.get(key).is_some()
    }

    /// Live entries in registration order.
    pub(crate) fn live(&self) -> impl Iterator<Item = (RecordKey, &Entry)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Live(entry) => Some((RecordKey(i), entry)),
            _ => None,
        })
    }

    pub(crate) fn live_keys(&self) -> Vec<RecordKey> {
        self.live().map(|(key, _)| key).collect()
    }

    pub(crate) fn remove(&mut self, key: RecordKey) {
        let index = self.resolve(key).0;
        if let Some(slot) = self.slots.get_mut(index) {
            if let Slot::Live(entry) = slot {
                let entry = std::mem::replace(entry, Entry::new("", Origin::Direct));
                *slot = Slot::Removed(entry);
            }
        }
    }

    /// Redirects `loser` to `winner` and rewrites every relationship that
    /// pointed at the loser.
    pub(crate) fn merge(&mut self, loser: RecordKey, winner: RecordKey) {
        let loser = self.resolve(loser);
        let winner = self.resolve(winner);
        if loser == winner {
            return;
        }
        if let Some(slot) = self.slots.get_mut(loser.0) {
            *slot = Slot::Merged(winner);
        }
        for slot in &mut self.slots {
            let (Slot::Live(entry) | Slot::Removed(entry)) = slot else {
                continue;
            };
            for targets in entry.relations.values_mut() {
                if !targets.contains(&loser) {
                    continue;
                }
                let mut rewritten = Vec::with_capacity(targets.len());
                for key in targets.drain(..) {
                    let key = if key == loser { winner } else { key };
                    if !rewritten.contains(&key) {
                        rewritten.push(key);
                    }
                }
                *targets = rewritten;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_one_attach_replaces_partner() {
        let mut entry = Entry::new("Parent", Origin::Direct);
        assert_eq!(entry.attach("child", RecordKey(1), Cardinality::One), None);
        assert_eq!(
            entry.attach("child", RecordKey(2), Cardinality::One),
            Some(RecordKey(1))
        );
        assert_eq!(entry.related("child"), &[RecordKey(2)]);
        assert_eq!(entry.attach("child", RecordKey(2), Cardinality::One), None);
    }

    #[test]
    fn to_many_attach_is_a_set() {
        let mut entry = Entry::new("Parent", Origin::Direct);
        entry.attach("children", RecordKey(1), Cardinality::Many);
        entry.attach("children", RecordKey(1), Cardinality::Many);
        entry.attach("children", RecordKey(2), Cardinality::Many);
        assert_eq!(entry.related("children"), &[RecordKey(1), RecordKey(2)]);
        assert!(entry.detach("children", RecordKey(1)));
        assert!(!entry.detach("children", RecordKey(1)));
    }

    #[test]
    fn touch_only_affects_committed_records() {
        let mut entry = Entry::new("Item", Origin::Direct);
        entry.touch();
        assert_eq!(entry.state, EntryState::PendingInsert);
        entry.state = EntryState::Committed;
        entry.touch();
        assert_eq!(entry.state, EntryState::PendingUpdate);
    }

    #[test]
    fn merge_redirects_and_rewrites_links() {
        let mut arena = Arena::default();
        let old = arena.push(Entry::new("Item", Origin::Fetched));
        let new = arena.push(Entry::new("Item", Origin::Direct));
        let mut holder = Entry::new("Holder", Origin::Direct);
        holder.attach("items", old, Cardinality::Many);
        holder.attach("items", new, Cardinality::Many);
        let holder = arena.push(holder);

        arena.merge(old, new);

        assert_eq!(arena.resolve(old), new);
        assert!(arena.is_live(old));
        assert_eq!(arena.get(holder).unwrap().related("items"), &[new]);
        assert_eq!(arena.live_keys(), vec![new, holder]);
    }

    #[test]
    fn removed_entries_stay_readable() {
        let mut arena = Arena::default();
        let mut entry = Entry::new("Item", Origin::Direct);
        entry.attributes.insert("value".into(), Value::from(1));
        let key = arena.push(entry);

        arena.remove(key);

        assert!(!arena.is_live(key));
        assert_eq!(arena.any(key).unwrap().attributes["value"], Value::from(1));
        assert_eq!(arena.len(), 1);
    }
}
