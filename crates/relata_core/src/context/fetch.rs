//! Fetching through a context.
//!
//! Results merge committed rows with the context's own view: records the
//! context has already loaded are answered from memory (including unsaved
//! edits), pending deletes are hidden, and pending inserts are appended.
//! Loaded records whose row another context has since deleted are hidden
//! too.

use super::{ContextState, ModelContext};
use crate::error::CoreResult;
use crate::gateway::{RowView, StoredRow};
use crate::graph::{Entry, EntryState, Origin};
use crate::identity::{IdentityKind, PersistentId};
use crate::query::{compare_by, FetchDescriptor, FieldSource};
use crate::record::{RecordKey, RecordRef};
use crate::schema::{Cardinality, EntityType};
use crate::types::RowId;
use relata_codec::Value;
use std::collections::BTreeMap;

static NO_ATTRIBUTES: BTreeMap<String, Value> = BTreeMap::new();

enum Candidate {
    Stored(RowId, StoredRow),
    Local(RecordKey),
}

enum CandidateView<'a> {
    Stored(RowView<'a>),
    Local(&'a BTreeMap<String, Value>),
}

impl FieldSource for CandidateView<'_> {
    fn value(&self, field: &str) -> Option<&Value> {
        match self {
            CandidateView::Stored(row) => row.value(field),
            CandidateView::Local(attributes) => attributes.get(field),
        }
    }
}

fn view<'a>(
    state: &'a ContextState,
    entity: &'a EntityType,
    candidate: &'a Candidate,
) -> CandidateView<'a> {
    match candidate {
        Candidate::Stored(_, row) => CandidateView::Stored(RowView::new(row, entity)),
        Candidate::Local(key) => CandidateView::Local(
            state
                .arena
                .get(*key)
                .map_or(&NO_ATTRIBUTES, |entry| &entry.attributes),
        ),
    }
}

impl ModelContext {
    /// Records matching `criteria`, in sort order.
    ///
    /// Unsaved inserts and edits of this context are visible; records it
    /// has marked for deletion are not. Without sort keys, saved records come
    /// first in row order, followed by unsaved ones in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::UnknownEntity`] for unknown entity types,
    /// or the gateway's error.
    pub fn fetch(&self, criteria: &FetchDescriptor) -> CoreResult<Vec<RecordRef>> {
        let schema = std::sync::Arc::clone(&self.shared.schema);
        let entity = schema.entity(&criteria.entity)?;

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let candidates = if Self::has_local(state, entity) {
            criteria.page(self.merged(state, entity, criteria)?)
        } else {
            self.shared
                .gateway
                .query(criteria)?
                .into_iter()
                .map(|(row, data)| Candidate::Stored(row, data))
                .collect()
        };

        let mut found = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let key = match candidate {
                Candidate::Local(key) => key,
                Candidate::Stored(row, data) => self.materialize(state, entity.name(), row, data)?,
            };
            found.push(self.handle(key));
        }
        Ok(found)
    }

    /// Every record of `entity`.
    ///
    /// # Errors
    ///
    /// Same as [`ModelContext::fetch`].
    pub fn fetch_all(&self, entity: &str) -> CoreResult<Vec<RecordRef>> {
        self.fetch(&FetchDescriptor::new(entity))
    }

    /// How many records [`ModelContext::fetch`] would return, without
    /// loading them.
    ///
    /// # Errors
    ///
    /// Same as [`ModelContext::fetch`].
    pub fn count(&self, criteria: &FetchDescriptor) -> CoreResult<usize> {
        let entity = self.shared.schema.entity(&criteria.entity)?;
        let state = self.shared.state.lock();
        let total = if Self::has_local(&state, entity) {
            self.merged(&state, entity, criteria)?.len()
        } else {
            self.shared
                .gateway
                .row_count(entity.name(), &criteria.predicate)?
        };
        let remaining = total.saturating_sub(criteria.offset);
        Ok(criteria.limit.map_or(remaining, |limit| remaining.min(limit)))
    }

    /// Number of records of `entity`.
    ///
    /// # Errors
    ///
    /// Same as [`ModelContext::fetch`].
    pub fn count_all(&self, entity: &str) -> CoreResult<usize> {
        self.count(&FetchDescriptor::new(entity))
    }

    /// Resolves an identifier to a record of this context, loading it if
    /// needed. Provisional identifiers only resolve in the context that
    /// minted them; durable ones resolve anywhere over the same store.
    ///
    /// # Errors
    ///
    /// Returns the gateway's error.
    pub fn fetch_by_id(&self, id: &PersistentId) -> CoreResult<Option<RecordRef>> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;

        if let Some(key) = state.identity.resolve(id) {
            let key = state.arena.resolve(key);
            let Some(entry) = state.arena.get(key) else {
                return Ok(None);
            };
            if entry.state == EntryState::PendingDelete || !self.row_exists(entry)? {
                return Ok(None);
            }
            return Ok(Some(self.handle(key)));
        }

        let IdentityKind::Durable { store, row } = id.kind() else {
            return Ok(None);
        };
        if store != self.shared.gateway.store_id() {
            return Ok(None);
        }
        match self.shared.gateway.get(id.entity(), row)? {
            Some(data) => {
                let key = self.materialize(state, id.entity(), row, data)?;
                Ok(Some(self.handle(key)))
            }
            None => Ok(None),
        }
    }

    /// Deletes every record `criteria` currently matches and saves. Deletes
    /// made this way cascade through cascade relationships regardless of how
    /// the records entered the context.
    ///
    /// Returns the number of matched records.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ConstraintViolation`] when a deny rule
    /// blocks the delete; the matched records are left unmarked.
    pub fn delete_where(&self, criteria: &FetchDescriptor) -> CoreResult<usize> {
        let matched = self.fetch(criteria)?;
        let snapshot = {
            let mut state = self.shared.state.lock();
            let snapshot = state.arena.clone();
            for record in &matched {
                if let Some(entry) = state.arena.get_mut(record.key()) {
                    entry.state = EntryState::PendingDelete;
                    entry.bulk_delete = true;
                }
            }
            snapshot
        };

        if let Err(err) = self.save() {
            self.shared.state.lock().arena = snapshot;
            return Err(err);
        }
        Ok(matched.len())
    }

    fn has_local(state: &ContextState, entity: &EntityType) -> bool {
        state
            .arena
            .live()
            .any(|(_, entry)| entry.entity == entity.name())
    }

    /// Stored rows not loaded here plus this context's own records, filtered
    /// and sorted but not paged.
    fn merged(
        &self,
        state: &ContextState,
        entity: &EntityType,
        criteria: &FetchDescriptor,
    ) -> CoreResult<Vec<Candidate>> {
        let unpaged = FetchDescriptor {
            entity: criteria.entity.clone(),
            predicate: criteria.predicate.clone(),
            ..FetchDescriptor::new(entity.name())
        };

        let mut ordered: Vec<(Option<RowId>, Candidate)> = Vec::new();
        for (row, data) in self.shared.gateway.query(&unpaged)? {
            let loaded = state
                .identity
                .key_for_row(row)
                .is_some_and(|key| state.arena.is_live(key));
            if !loaded {
                ordered.push((Some(row), Candidate::Stored(row, data)));
            }
        }
        for (key, entry) in state.arena.live() {
            if entry.entity != entity.name() || entry.state == EntryState::PendingDelete {
                continue;
            }
            if criteria.predicate.matches(&entry.attributes) && self.row_exists(entry)? {
                ordered.push((entry.row, Candidate::Local(key)));
            }
        }

        ordered.sort_by_key(|(row, _)| (row.is_none(), *row));
        let mut candidates: Vec<Candidate> = ordered.into_iter().map(|(_, c)| c).collect();
        if !criteria.sort.is_empty() {
            candidates.sort_by(|a, b| {
                compare_by(
                    &criteria.sort,
                    &view(state, entity, a),
                    &view(state, entity, b),
                )
            });
        }
        Ok(candidates)
    }

    /// Returns the key bound to `row`, loading the row and every row it
    /// reaches through relationships when it is not loaded yet.
    fn materialize(
        &self,
        state: &mut ContextState,
        entity: &str,
        row: RowId,
        data: StoredRow,
    ) -> CoreResult<RecordKey> {
        if let Some(key) = Self::loaded(state, row) {
            return Ok(key);
        }

        let root = self.load(state, entity, row, data.attributes, data.inserted_directly)?;
        let mut work = vec![(root, data.links)];
        while let Some((owner, links)) = work.pop() {
            let owner_entity = match state.arena.get(owner) {
                Some(entry) => entry.entity.clone(),
                None => continue,
            };
            for (field, rows) in links {
                let Ok(declared) = self.shared.schema.relationship(&owner_entity, &field) else {
                    continue;
                };
                let target_entity = declared.target().unwrap_or_default().to_string();
                for row in rows {
                    let target = match Self::loaded(state, row) {
                        Some(key) => {
                            self.mirror(state, key, &owner_entity, &field, owner);
                            Some(key)
                        }
                        None => match self.shared.gateway.get(&target_entity, row)? {
                            Some(data) => {
                                let key = self.load(
                                    state,
                                    &target_entity,
                                    row,
                                    data.attributes,
                                    data.inserted_directly,
                                )?;
                                work.push((key, data.links));
                                Some(key)
                            }
                            None => None,
                        },
                    };
                    let Some(entry) = state.arena.get_mut(owner) else {
                        continue;
                    };
                    match target {
                        Some(key) => {
                            let column = entry.relations.entry(field.clone()).or_default();
                            if !column.contains(&key) {
                                column.push(key);
                            }
                        }
                        None => entry.dangling.entry(field.clone()).or_default().push(row),
                    }
                }
            }
        }
        Ok(root)
    }

    /// Whether a saved record's row is still in the store. Unsaved records
    /// have no row and always exist.
    fn row_exists(&self, entry: &Entry) -> CoreResult<bool> {
        match entry.row {
            Some(row) => Ok(self.shared.gateway.get(&entry.entity, row)?.is_some()),
            None => Ok(true),
        }
    }

    fn loaded(state: &ContextState, row: RowId) -> Option<RecordKey> {
        state
            .identity
            .key_for_row(row)
            .map(|key| state.arena.resolve(key))
            .filter(|key| state.arena.is_live(*key))
    }

    /// A freshly loaded record links to one this context already holds; make
    /// the held side point back when it has room for it.
    fn mirror(
        &self,
        state: &mut ContextState,
        held: RecordKey,
        owner_entity: &str,
        field: &str,
        owner: RecordKey,
    ) {
        let Some(inverse) = self.shared.schema.inverse_of(owner_entity, field) else {
            return;
        };
        let Some(entry) = state.arena.get_mut(held) else {
            return;
        };
        let cardinality = self
            .shared
            .schema
            .field(&entry.entity, inverse)
            .ok()
            .and_then(|f| f.cardinality());
        let column = entry.relations.entry(inverse.to_string()).or_default();
        let room = match cardinality {
            Some(Cardinality::One) => column.is_empty(),
            Some(Cardinality::Many) => !column.contains(&owner),
            None => false,
        };
        if room {
            column.push(owner);
        }
    }

    fn load(
        &self,
        state: &mut ContextState,
        entity: &str,
        row: RowId,
        attributes: BTreeMap<String, Value>,
        inserted_directly: bool,
    ) -> CoreResult<RecordKey> {
        let entity_type = self.shared.schema.entity(entity)?;
        let mut entry = Entry::new(entity, Origin::Fetched);
        entry.state = EntryState::Committed;
        entry.inserted_directly = inserted_directly;
        entry.row = Some(row);
        for field in entity_type.attributes() {
            if let Some(default) = field.transient_default() {
                entry.attributes.insert(field.name().to_string(), default.clone());
            }
        }
        entry.attributes.extend(attributes);

        let key = state.arena.push(entry);
        state.identity.adopt(key, entity, row);
        Ok(key)
    }
}
