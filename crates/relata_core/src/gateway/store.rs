//! Journaled row store.
//!
//! Rows live in memory. Every commit is first computed against a copy of
//! the tables, then appended to the journal as one frame, and only then
//! swapped in; a failure at any step leaves the visible tables untouched.
//! Opening a file store replays the journal.

use super::{
    Changeset, CommitReceipt, PersistenceGateway, RowTarget, RowView, StoredRow,
};
use crate::config::{StorageMode, StoreConfiguration};
use crate::error::{CoreError, CoreResult};
use crate::query::{compare_by, FetchDescriptor, Predicate};
use crate::schema::{EntityType, Schema};
use crate::types::{RowId, SequenceNumber, StoreId};
use parking_lot::{Mutex, RwLock};
use relata_codec::{from_cbor, to_cbor, Value};
use relata_storage::{FileBackend, InMemoryBackend, Journal, StorageBackend, StorageError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
enum JournalEntry {
    Header {
        store: StoreId,
        format: u16,
    },
    Commit {
        sequence: SequenceNumber,
        next_row: u64,
        changes: Vec<RowChange>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
enum RowChange {
    Put {
        entity: String,
        row: RowId,
        data: StoredRow,
    },
    Remove {
        entity: String,
        row: RowId,
    },
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<String, BTreeMap<RowId, StoredRow>>,
    next_row: u64,
    sequence: SequenceNumber,
}

impl Tables {
    fn allocate(&mut self) -> RowId {
        self.next_row += 1;
        RowId(self.next_row)
    }

    fn table(&self, entity: &str) -> Option<&BTreeMap<RowId, StoredRow>> {
        self.rows.get(entity)
    }

    fn table_mut(&mut self, entity: &str) -> &mut BTreeMap<RowId, StoredRow> {
        self.rows.entry(entity.to_string()).or_default()
    }

    fn apply(&mut self, change: RowChange) {
        match change {
            RowChange::Put { entity, row, data } => {
                self.table_mut(&entity).insert(row, data);
            }
            RowChange::Remove { entity, row } => {
                self.table_mut(&entity).remove(&row);
            }
        }
    }

    /// First row other than `exclude` sharing a non-null unique key with
    /// `attributes`.
    fn unique_match(
        &self,
        entity: &EntityType,
        attributes: &BTreeMap<String, Value>,
        exclude: Option<RowId>,
    ) -> Option<(RowId, String)> {
        let table = self.table(entity.name())?;
        for field in entity.unique_fields() {
            let Some(key) = attributes.get(field.name()).filter(|v| !v.is_null()) else {
                continue;
            };
            let hit = table.iter().find(|(row, data)| {
                Some(**row) != exclude
                    && data
                        .attributes
                        .get(field.name())
                        .is_some_and(|v| v.compare(key) == Ordering::Equal)
            });
            if let Some((row, _)) = hit {
                return Some((*row, field.name().to_string()));
            }
        }
        None
    }
}

/// The journaled [`PersistenceGateway`].
///
/// ```
/// use relata_core::{EntityType, Field, ScalarType, Schema, Store, StoreConfiguration};
/// use std::sync::Arc;
///
/// let schema = Schema::builder()
///     .entity(EntityType::new("Item").field(Field::attribute("value", ScalarType::Integer)))
///     .build()
///     .unwrap();
/// let store = Store::open(StoreConfiguration::in_memory(), Arc::new(schema)).unwrap();
/// assert_eq!(store.sequence().as_u64(), 0);
/// ```
pub struct Store {
    id: StoreId,
    schema: Arc<Schema>,
    config: StoreConfiguration,
    tables: RwLock<Tables>,
    journal: Mutex<Journal<Box<dyn StorageBackend>>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Opens a store.
    ///
    /// File stores replay their journal; a torn final frame is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for a file store without a
    /// location, and storage or codec errors when the journal cannot be
    /// opened or replayed.
    pub fn open(config: StoreConfiguration, schema: Arc<Schema>) -> CoreResult<Self> {
        let backend: Box<dyn StorageBackend> = match config.storage_mode {
            StorageMode::InMemory => Box::new(InMemoryBackend::new()),
            StorageMode::File => {
                let path = config.location.as_deref().ok_or_else(|| {
                    CoreError::invalid_operation("file storage requires a location")
                })?;
                if config.truncate_existing {
                    Box::new(FileBackend::create(path)?)
                } else {
                    Box::new(FileBackend::open(path)?)
                }
            }
        };
        Self::open_with_backend(config, schema, backend)
    }

    /// Opens an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the journal header cannot be written.
    pub fn in_memory(schema: Arc<Schema>) -> CoreResult<Self> {
        Self::open(StoreConfiguration::in_memory(), schema)
    }

    /// Opens a store over an arbitrary backend, replaying whatever it holds.
    ///
    /// # Errors
    ///
    /// Returns storage or codec errors when the journal cannot be replayed.
    pub fn open_with_backend(
        config: StoreConfiguration,
        schema: Arc<Schema>,
        backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let mut journal = Journal::new(backend);
        if config.truncate_existing {
            journal.reset()?;
        }
        let recovery = journal.recover()?;

        let mut tables = Tables::default();
        let mut frames = recovery.frames.iter();
        let id = match frames.next() {
            Some(first) => match from_cbor::<JournalEntry>(first)? {
                JournalEntry::Header { store, format } => {
                    if format != FORMAT_VERSION {
                        return Err(CoreError::invalid_operation(format!(
                            "unsupported journal format {format}"
                        )));
                    }
                    store
                }
                JournalEntry::Commit { .. } => {
                    return Err(StorageError::corrupted(0, "journal has no header").into());
                }
            },
            None => {
                let store = StoreId::generate();
                journal.append(&to_cbor(&JournalEntry::Header {
                    store,
                    format: FORMAT_VERSION,
                })?)?;
                journal.commit(config.sync_on_commit)?;
                store
            }
        };

        for frame in frames {
            match from_cbor::<JournalEntry>(frame)? {
                JournalEntry::Commit {
                    sequence,
                    next_row,
                    changes,
                } => {
                    for change in changes {
                        tables.apply(change);
                    }
                    tables.sequence = sequence;
                    tables.next_row = tables.next_row.max(next_row);
                }
                JournalEntry::Header { .. } => {
                    return Err(StorageError::corrupted(0, "repeated journal header").into());
                }
            }
        }

        info!(
            store = %id,
            mode = ?config.storage_mode,
            sequence = tables.sequence.as_u64(),
            discarded_bytes = recovery.discarded_bytes,
            "opened store"
        );

        Ok(Self {
            id,
            schema,
            config,
            tables: RwLock::new(tables),
            journal: Mutex::new(journal),
        })
    }

    /// Sequence number of the latest commit.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.tables.read().sequence
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &StoreConfiguration {
        &self.config
    }

    fn resolve(
        target: RowTarget,
        assigned: &[RowId],
    ) -> CoreResult<RowId> {
        match target {
            RowTarget::Row(row) => Ok(row),
            RowTarget::Pending(index) => assigned.get(index).copied().ok_or_else(|| {
                CoreError::invalid_operation(format!("link to unknown pending insert {index}"))
            }),
        }
    }

    fn resolve_links(
        links: BTreeMap<String, Vec<RowTarget>>,
        assigned: &[RowId],
    ) -> CoreResult<BTreeMap<String, Vec<RowId>>> {
        links
            .into_iter()
            .map(|(field, targets)| {
                let mut rows = Vec::with_capacity(targets.len());
                for target in targets {
                    let row = Self::resolve(target, assigned)?;
                    if !rows.contains(&row) {
                        rows.push(row);
                    }
                }
                Ok((field, rows))
            })
            .collect()
    }
}

impl PersistenceGateway for Store {
    fn store_id(&self) -> StoreId {
        self.id
    }

    fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn commit(&self, changeset: Changeset) -> CoreResult<CommitReceipt> {
        let mut journal = self.journal.lock();
        let mut staged = self.tables.read().clone();
        let mut removed: BTreeSet<(String, RowId)> = BTreeSet::new();
        let mut written: BTreeSet<(String, RowId)> = BTreeSet::new();

        for delete in &changeset.deletes {
            self.schema.entity(&delete.entity)?;
            if staged.table_mut(&delete.entity).remove(&delete.row).is_some() {
                removed.insert((delete.entity.clone(), delete.row));
            }
        }

        // Updates land before inserts are matched, so an insert only upserts
        // onto a row that still holds its key once this changeset applies.
        let mut update_links = Vec::with_capacity(changeset.updates.len());
        for update in changeset.updates {
            self.schema.entity(&update.entity)?;
            let Some(previous) = staged.table(&update.entity).and_then(|t| t.get(&update.row))
            else {
                debug!(entity = %update.entity, row = %update.row, "skipping update of removed row");
                continue;
            };
            let data = StoredRow {
                attributes: update.attributes,
                links: BTreeMap::new(),
                inserted_directly: previous.inserted_directly,
            };
            staged.table_mut(&update.entity).insert(update.row, data);
            written.insert((update.entity.clone(), update.row));
            update_links.push((update.entity, update.row, update.links));
        }
        for (entity, row, _) in &update_links {
            let entity_type = self.schema.entity(entity)?;
            let Some(data) = staged.table(entity).and_then(|t| t.get(row)) else {
                continue;
            };
            if let Some((other, field)) =
                staged.unique_match(entity_type, &data.attributes, Some(*row))
            {
                return Err(CoreError::constraint_violation(format!(
                    "{entity}.{field} of {row} collides with {other}"
                )));
            }
        }

        // Unique keys upsert: a colliding insert takes over the existing row,
        // later values winning.
        let mut assigned = Vec::with_capacity(changeset.inserts.len());
        let mut claimed: BTreeSet<(String, RowId)> = BTreeSet::new();
        for insert in &changeset.inserts {
            let entity = self.schema.entity(&insert.entity)?;
            let row = match staged.unique_match(entity, &insert.attributes, None) {
                Some((row, _)) => row,
                None => staged.allocate(),
            };
            staged.table_mut(&insert.entity).insert(
                row,
                StoredRow {
                    attributes: insert.attributes.clone(),
                    links: BTreeMap::new(),
                    inserted_directly: insert.inserted_directly,
                },
            );
            removed.remove(&(insert.entity.clone(), row));
            written.insert((insert.entity.clone(), row));
            claimed.insert((insert.entity.clone(), row));
            assigned.push(row);
        }

        for (entity, row, links) in update_links {
            if claimed.contains(&(entity.clone(), row)) {
                continue;
            }
            let links = Self::resolve_links(links, &assigned)?;
            if let Some(data) = staged.table_mut(&entity).get_mut(&row) {
                data.links = links;
            }
        }
        for (insert, row) in changeset.inserts.into_iter().zip(&assigned) {
            let links = Self::resolve_links(insert.links, &assigned)?;
            if let Some(data) = staged.table_mut(&insert.entity).get_mut(row) {
                data.links = links;
            }
        }

        let mut changes = Vec::with_capacity(removed.len() + written.len());
        for (entity, row) in removed {
            changes.push(RowChange::Remove { entity, row });
        }
        for (entity, row) in written {
            if let Some(data) = staged.table(&entity).and_then(|t| t.get(&row)) {
                let data = data.clone();
                changes.push(RowChange::Put { entity, row, data });
            }
        }

        staged.sequence = staged.sequence.next();
        let entry = JournalEntry::Commit {
            sequence: staged.sequence,
            next_row: staged.next_row,
            changes,
        };
        let offset = journal.append(&to_cbor(&entry)?)?;
        if let Err(err) = journal.commit(self.config.sync_on_commit) {
            // the frame must not replay on reopen once the caller sees the error
            if let Err(undo) = journal.discard_from(offset) {
                warn!(store = %self.id, offset, error = %undo, "failed to drop unflushed frame");
            }
            return Err(err.into());
        }

        let sequence = staged.sequence;
        *self.tables.write() = staged;
        debug!(
            store = %self.id,
            sequence = sequence.as_u64(),
            inserted = assigned.len(),
            "committed changeset"
        );

        Ok(CommitReceipt { sequence, assigned })
    }

    fn query(&self, criteria: &FetchDescriptor) -> CoreResult<Vec<(RowId, StoredRow)>> {
        let entity = self.schema.entity(&criteria.entity)?;
        let tables = self.tables.read();
        let mut rows: Vec<(RowId, StoredRow)> = tables
            .table(&criteria.entity)
            .into_iter()
            .flatten()
            .filter(|(_, data)| criteria.predicate.matches(&RowView::new(data, entity)))
            .map(|(row, data)| (*row, data.clone()))
            .collect();
        drop(tables);

        if !criteria.sort.is_empty() {
            rows.sort_by(|(_, a), (_, b)| {
                compare_by(
                    &criteria.sort,
                    &RowView::new(a, entity),
                    &RowView::new(b, entity),
                )
            });
        }
        Ok(criteria.page(rows))
    }

    fn row_count(&self, entity: &str, predicate: &Predicate) -> CoreResult<usize> {
        let entity_type = self.schema.entity(entity)?;
        let tables = self.tables.read();
        Ok(tables
            .table(entity)
            .into_iter()
            .flatten()
            .filter(|(_, data)| predicate.matches(&RowView::new(data, entity_type)))
            .count())
    }

    fn get(&self, entity: &str, row: RowId) -> CoreResult<Option<StoredRow>> {
        self.schema.entity(entity)?;
        Ok(self
            .tables
            .read()
            .table(entity)
            .and_then(|t| t.get(&row))
            .cloned())
    }
}
