//! The persistence gateway: what a context needs from durable storage.
//!
//! Contexts talk to storage only through [`PersistenceGateway`]. A gateway
//! commits whole changesets atomically and answers row queries; it knows the
//! schema but nothing about contexts, identities or delete rules.
//! [`Store`] is the journaled implementation shipped with this crate.

mod store;

pub use store::Store;

use crate::error::CoreResult;
use crate::query::{FetchDescriptor, FieldSource, Predicate};
use crate::schema::{EntityType, Schema};
use crate::types::{RowId, SequenceNumber, StoreId};
use relata_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A committed row: persisted attributes plus relationship columns.
///
/// To-one relationships hold at most one row id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    /// Persisted attribute values.
    pub attributes: BTreeMap<String, Value>,
    /// Related rows per relationship field.
    pub links: BTreeMap<String, Vec<RowId>>,
    /// The row was created by a direct insert rather than reached through
    /// another record's relationship.
    #[serde(default)]
    pub inserted_directly: bool,
}

/// A link target inside a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowTarget {
    /// The insert at this index of the same changeset.
    Pending(usize),
    /// An already committed row.
    Row(RowId),
}

/// A row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    /// Entity type.
    pub entity: String,
    /// Persisted attribute values.
    pub attributes: BTreeMap<String, Value>,
    /// Relationship columns.
    pub links: BTreeMap<String, Vec<RowTarget>>,
    /// Whether the caller inserted the record directly.
    pub inserted_directly: bool,
}

/// A full replacement of a committed row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowWrite {
    /// Entity type.
    pub entity: String,
    /// Row being replaced.
    pub row: RowId,
    /// Persisted attribute values.
    pub attributes: BTreeMap<String, Value>,
    /// Relationship columns.
    pub links: BTreeMap<String, Vec<RowTarget>>,
}

/// A row to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDelete {
    /// Entity type.
    pub entity: String,
    /// Row being removed.
    pub row: RowId,
}

/// Everything one save hands to the gateway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    /// New rows, in registration order.
    pub inserts: Vec<PendingRow>,
    /// Replaced rows.
    pub updates: Vec<RowWrite>,
    /// Removed rows.
    pub deletes: Vec<RowDelete>,
}

impl Changeset {
    /// Whether the changeset does nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// What a successful commit assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Sequence number of the commit.
    pub sequence: SequenceNumber,
    /// Row of each insert, by insert index. Inserts that collided on a
    /// unique key share the surviving row.
    pub assigned: Vec<RowId>,
}

/// Durable storage as seen by a context.
///
/// Implementations must be safe to share between contexts on different
/// threads. Concurrent commits touching the same row resolve last write wins,
/// per row.
pub trait PersistenceGateway: Send + Sync {
    /// Identity of the store, stable across reopen.
    fn store_id(&self) -> StoreId;

    /// The schema rows are validated against.
    fn schema(&self) -> &Arc<Schema>;

    /// Applies a changeset atomically: all of it or none of it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::ConstraintViolation`] when an update
    /// collides on a unique key, or the storage error that aborted the commit.
    /// Unique keys of inserts are matched against the rows as they stand
    /// after the changeset's deletes and updates.
    fn commit(&self, changeset: Changeset) -> CoreResult<CommitReceipt>;

    /// Rows of `criteria.entity` matching the predicate, sorted and paged.
    /// Each call runs the query from the start.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::UnknownEntity`] for unknown entity types.
    fn query(&self, criteria: &FetchDescriptor) -> CoreResult<Vec<(RowId, StoredRow)>>;

    /// Number of rows of `entity` matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::UnknownEntity`] for unknown entity types.
    fn row_count(&self, entity: &str, predicate: &Predicate) -> CoreResult<usize>;

    /// One row by id, if it still exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::UnknownEntity`] for unknown entity types.
    fn get(&self, entity: &str, row: RowId) -> CoreResult<Option<StoredRow>>;
}

/// A stored row read through its entity type, so transient attributes show
/// their defaults.
pub struct RowView<'a> {
    row: &'a StoredRow,
    entity: &'a EntityType,
}

impl<'a> RowView<'a> {
    /// Wraps a row of `entity`.
    #[must_use]
    pub fn new(row: &'a StoredRow, entity: &'a EntityType) -> Self {
        Self { row, entity }
    }
}

impl FieldSource for RowView<'_> {
    fn value(&self, field: &str) -> Option<&Value> {
        self.row.attributes.get(field).or_else(|| {
            self.entity
                .get(field)
                .and_then(|f| f.transient_default())
        })
    }
}
