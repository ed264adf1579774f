//! Saving and rolling back a context.

use super::ModelContext;
use crate::error::CoreResult;
use crate::gateway::{Changeset, PendingRow, RowDelete, RowTarget, RowWrite};
use crate::graph::{delete_rules, Arena, Entry, EntryState, Origin};
use crate::record::RecordKey;
use crate::schema::EntityType;
use crate::types::SequenceNumber;
use relata_codec::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// What one save did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows rewritten.
    pub updated: usize,
    /// Records deleted, including cascaded ones.
    pub deleted: usize,
    /// Records deleted by cascade.
    pub cascaded: usize,
    /// Back-references cleared by nullify and deny rules.
    pub nullified: usize,
    /// Sequence number of the commit, if anything was sent to the store.
    pub sequence: Option<SequenceNumber>,
}

impl SaveSummary {
    /// Whether the save changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

fn persisted(entity: &EntityType, entry: &Entry) -> BTreeMap<String, Value> {
    entity
        .persisted_attributes()
        .filter_map(|field| {
            entry
                .attributes
                .get(field.name())
                .map(|value| (field.name().to_string(), value.clone()))
        })
        .collect()
}

fn target(arena: &Arena, inserts: &HashMap<RecordKey, usize>, key: RecordKey) -> Option<RowTarget> {
    let key = arena.resolve(key);
    match inserts.get(&key) {
        Some(index) => Some(RowTarget::Pending(*index)),
        None => arena.any(key).and_then(|entry| entry.row).map(RowTarget::Row),
    }
}

fn links(
    arena: &Arena,
    inserts: &HashMap<RecordKey, usize>,
    entry: &Entry,
) -> BTreeMap<String, Vec<RowTarget>> {
    let mut links: BTreeMap<String, Vec<RowTarget>> = BTreeMap::new();
    for (field, keys) in &entry.relations {
        let column: Vec<RowTarget> = keys
            .iter()
            .filter_map(|key| target(arena, inserts, *key))
            .collect();
        if !column.is_empty() {
            links.insert(field.clone(), column);
        }
    }
    for (field, rows) in &entry.dangling {
        links
            .entry(field.clone())
            .or_default()
            .extend(rows.iter().copied().map(RowTarget::Row));
    }
    links
}

impl ModelContext {
    /// Commits every pending change atomically.
    ///
    /// Delete rules are evaluated first. Cascades and nullifications are part
    /// of the same commit. On any error the context is left exactly as it
    /// was, still holding its pending changes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ConstraintViolation`] when a deny rule
    /// blocks a delete or an update collides on a unique key, or the
    /// gateway's error.
    pub fn save(&self) -> CoreResult<SaveSummary> {
        let summary = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let schema = &self.shared.schema;

            let plan = delete_rules::plan(schema, &state.arena)?;
            if !state.arena.live().any(|(_, entry)| entry.is_pending()) {
                return Ok(SaveSummary::default());
            }

            let mut arena = state.arena.clone();
            let nullified = delete_rules::apply(&plan, &mut arena);
            if !plan.is_empty() {
                debug!(
                    context = %self.shared.id,
                    deletions = plan.deletions.len(),
                    cascaded = plan.cascaded,
                    nullified,
                    "delete rules applied"
                );
            }
            let doomed: BTreeSet<RecordKey> = plan.deletions.iter().copied().collect();

            let mut insert_keys = Vec::new();
            let mut inserts = HashMap::new();
            for (key, entry) in arena.live() {
                if entry.state == EntryState::PendingInsert && !doomed.contains(&key) {
                    inserts.insert(key, insert_keys.len());
                    insert_keys.push(key);
                }
            }

            let mut changeset = Changeset::default();
            for &key in &insert_keys {
                let Some(entry) = arena.get(key) else {
                    continue;
                };
                changeset.inserts.push(PendingRow {
                    entity: entry.entity.clone(),
                    attributes: persisted(schema.entity(&entry.entity)?, entry),
                    links: links(&arena, &inserts, entry),
                    inserted_directly: entry.inserted_directly,
                });
            }
            for (key, entry) in arena.live() {
                let Some(row) = entry.row else {
                    continue;
                };
                if entry.state == EntryState::PendingUpdate && !doomed.contains(&key) {
                    changeset.updates.push(RowWrite {
                        entity: entry.entity.clone(),
                        row,
                        attributes: persisted(schema.entity(&entry.entity)?, entry),
                        links: links(&arena, &inserts, entry),
                    });
                }
            }
            for &key in &plan.deletions {
                if let Some(entry) = arena.get(key) {
                    if let Some(row) = entry.row {
                        changeset.deletes.push(RowDelete {
                            entity: entry.entity.clone(),
                            row,
                        });
                    }
                }
            }

            let summary = SaveSummary {
                inserted: changeset.inserts.len(),
                updated: changeset.updates.len(),
                deleted: plan.deletions.len(),
                cascaded: plan.cascaded,
                nullified,
                sequence: None,
            };
            let receipt = if changeset.is_empty() {
                None
            } else {
                Some(self.shared.gateway.commit(changeset)?)
            };

            let mut identity = state.identity.clone();
            if let Some(receipt) = &receipt {
                for (index, &key) in insert_keys.iter().enumerate() {
                    let Some(&row) = receipt.assigned.get(index) else {
                        continue;
                    };
                    // a unique-key upsert may land on a row another record
                    // of this context already holds
                    let previous = identity
                        .key_for_row(row)
                        .map(|held| arena.resolve(held))
                        .filter(|held| *held != key && arena.is_live(*held));
                    let remint = arena
                        .get(key)
                        .is_some_and(|entry| entry.origin == Origin::Direct);
                    if let Some(entry) = arena.get_mut(key) {
                        entry.row = Some(row);
                    }
                    identity.reconcile(key, row, remint);
                    if let Some(loser) = previous {
                        arena.merge(loser, key);
                        identity.merge(loser, key);
                    }
                }
            }

            for key in arena.live_keys() {
                if doomed.contains(&key) {
                    identity.release(key);
                    arena.remove(key);
                } else if let Some(entry) = arena.get_mut(key) {
                    entry.state = EntryState::Committed;
                }
            }

            state.arena = arena;
            state.identity = identity;
            SaveSummary {
                sequence: receipt.map(|r| r.sequence),
                ..summary
            }
        };

        debug!(
            context = %self.shared.id,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "context saved"
        );
        for listener in self.shared.listeners.lock().iter() {
            listener(&summary);
        }
        Ok(summary)
    }

    /// Drops pending bookkeeping: unsaved inserts are discarded, pending
    /// updates and deletes of saved records go back to committed.
    ///
    /// Attribute and relationship edits already applied to saved records are
    /// kept in memory; only the change flags are cleared, so those edits are
    /// not written until the record is touched again.
    pub fn rollback(&self) {
        let mut guard = self.shared.state.lock();
        let arena = &mut guard.arena;
        for key in arena.live_keys() {
            let discard = match arena.get_mut(key) {
                Some(entry) if entry.state != EntryState::Committed && entry.row.is_none() => true,
                Some(entry) => {
                    entry.state = EntryState::Committed;
                    entry.bulk_delete = false;
                    false
                }
                None => false,
            };
            if discard {
                arena.remove(key);
            }
        }
        drop(guard);
        debug!(context = %self.shared.id, "context rolled back");
    }
}
