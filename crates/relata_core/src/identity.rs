//! Persistent identifiers and the per-context identity registry.
//!
//! An identifier is minted the moment a record is registered. It starts
//! out provisional (`context lineage + local sequence`) and is reconciled
//! to a durable `store + row` identifier when the record's insert commits.
//!
//! Records inserted directly are re-minted in place. Records that were
//! registered as a side effect of a deep-insert keep reporting the
//! provisional identifier they were minted with, while relationships and
//! fetches see the durable one. Callers comparing the two must not assume
//! they are interchangeable.

use crate::record::RecordKey;
use crate::types::{ContextId, RowId, StoreId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The provisional or durable part of an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// Minted at registration, before any commit.
    Provisional {
        /// Per-context sequence.
        seq: u64,
    },
    /// Bound to a committed row.
    Durable {
        /// Store holding the row.
        store: StoreId,
        /// The row.
        row: RowId,
    },
}

/// Identifier of a record as seen by one context.
///
/// Equality includes the minting context's lineage: two identifiers for the
/// same row minted by different contexts are unequal, although they hash
/// alike. Use [`PersistentId::same_row`] or a unique key to compare across
/// contexts.
#[derive(Debug, Clone)]
pub struct PersistentId {
    entity: String,
    kind: IdentityKind,
    lineage: ContextId,
}

impl PersistentId {
    pub(crate) fn provisional(entity: &str, lineage: ContextId, seq: u64) -> Self {
        Self {
            entity: entity.to_string(),
            kind: IdentityKind::Provisional { seq },
            lineage,
        }
    }

    pub(crate) fn durable(entity: &str, lineage: ContextId, store: StoreId, row: RowId) -> Self {
        Self {
            entity: entity.to_string(),
            kind: IdentityKind::Durable { store, row },
            lineage,
        }
    }

    /// Entity type name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Provisional or durable component.
    #[must_use]
    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// The context that minted this identifier.
    #[must_use]
    pub fn lineage(&self) -> ContextId {
        self.lineage
    }

    /// Whether the identifier is bound to a committed row.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        matches!(self.kind, IdentityKind::Durable { .. })
    }

    /// The committed row, if durable.
    #[must_use]
    pub fn row(&self) -> Option<RowId> {
        match self.kind {
            IdentityKind::Durable { row, .. } => Some(row),
            IdentityKind::Provisional { .. } => None,
        }
    }

    /// Content comparison: same entity and same durable row, whichever
    /// context minted either identifier.
    #[must_use]
    pub fn same_row(&self, other: &Self) -> bool {
        match (self.kind, other.kind) {
            (
                IdentityKind::Durable { store: a, row: r },
                IdentityKind::Durable { store: b, row: s },
            ) => self.entity == other.entity && a == b && r == s,
            _ => self == other,
        }
    }
}

impl PartialEq for PersistentId {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity && self.kind == other.kind && self.lineage == other.lineage
    }
}

impl Eq for PersistentId {}

impl Hash for PersistentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
        match self.kind {
            IdentityKind::Provisional { seq } => {
                0u8.hash(state);
                seq.hash(state);
            }
            IdentityKind::Durable { store, row } => {
                1u8.hash(state);
                store.hash(state);
                row.hash(state);
            }
        }
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IdentityKind::Provisional { seq } => {
                write!(f, "{}/p{}@{}", self.entity, seq, self.lineage)
            }
            IdentityKind::Durable { store, row } => {
                write!(f, "{}/{}/{}@{}", self.entity, store, row, self.lineage)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Identity {
    /// What the record itself reports.
    minted: PersistentId,
    /// What relationships and fetches see.
    canonical: PersistentId,
}

/// Maps arena keys to identifiers for one context, and back.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    lineage: ContextId,
    store: StoreId,
    next_seq: u64,
    identities: HashMap<RecordKey, Identity>,
    by_seq: HashMap<u64, RecordKey>,
    by_row: HashMap<RowId, RecordKey>,
}

impl IdentityRegistry {
    /// Creates an empty registry for a context over `store`.
    #[must_use]
    pub fn new(lineage: ContextId, store: StoreId) -> Self {
        Self {
            lineage,
            store,
            next_seq: 1,
            identities: HashMap::new(),
            by_seq: HashMap::new(),
            by_row: HashMap::new(),
        }
    }

    /// Mints a provisional identifier for a newly registered record.
    pub fn mint(&mut self, key: RecordKey, entity: &str) -> PersistentId {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = PersistentId::provisional(entity, self.lineage, seq);
        self.by_seq.insert(seq, key);
        self.identities.insert(
            key,
            Identity {
                minted: id.clone(),
                canonical: id.clone(),
            },
        );
        id
    }

    /// Binds a record loaded from the store to its row.
    pub fn adopt(&mut self, key: RecordKey, entity: &str, row: RowId) -> PersistentId {
        let id = PersistentId::durable(entity, self.lineage, self.store, row);
        self.by_row.insert(row, key);
        self.identities.insert(
            key,
            Identity {
                minted: id.clone(),
                canonical: id.clone(),
            },
        );
        id
    }

    /// Reconciles a committed insert with its row.
    ///
    /// With `remint` the record's own identifier becomes durable too;
    /// without it only the canonical identifier does.
    pub fn reconcile(&mut self, key: RecordKey, row: RowId, remint: bool) {
        let Some(identity) = self.identities.get_mut(&key) else {
            return;
        };
        let durable = PersistentId::durable(&identity.minted.entity, self.lineage, self.store, row);
        if remint {
            identity.minted = durable.clone();
        }
        identity.canonical = durable;
        self.by_row.insert(row, key);
    }

    /// Redirects `loser` to `winner` after two inserts collapsed into one row.
    /// The loser keeps its minted identifier.
    pub fn merge(&mut self, loser: RecordKey, winner: RecordKey) {
        let Some(canonical) = self.identities.get(&winner).map(|w| w.canonical.clone()) else {
            return;
        };
        if let Some(identity) = self.identities.get_mut(&loser) {
            identity.canonical = canonical;
        }
        if let Some(row) = self.identities.get(&winner).and_then(|w| w.canonical.row()) {
            self.by_row.insert(row, winner);
        }
    }

    /// Unbinds the row of a deleted record. Its identifiers stay readable.
    pub fn release(&mut self, key: RecordKey) {
        if let Some(row) = self.canonical(key).and_then(|id| id.row()) {
            if self.by_row.get(&row) == Some(&key) {
                self.by_row.remove(&row);
            }
        }
    }

    /// The identifier the record reports about itself.
    #[must_use]
    pub fn minted(&self, key: RecordKey) -> Option<&PersistentId> {
        self.identities.get(&key).map(|i| &i.minted)
    }

    /// The identifier relationships and fetches see.
    #[must_use]
    pub fn canonical(&self, key: RecordKey) -> Option<&PersistentId> {
        self.identities.get(&key).map(|i| &i.canonical)
    }

    /// The record bound to `row` in this context, if loaded.
    #[must_use]
    pub fn key_for_row(&self, row: RowId) -> Option<RecordKey> {
        self.by_row.get(&row).copied()
    }

    /// Resolves an identifier to a record of this context.
    ///
    /// Provisional identifiers resolve only within the lineage that minted
    /// them. Durable identifiers from any context resolve by row, as long as
    /// they name this store and the row is loaded here.
    #[must_use]
    pub fn resolve(&self, id: &PersistentId) -> Option<RecordKey> {
        match id.kind {
            IdentityKind::Provisional { seq } if id.lineage == self.lineage => {
                self.by_seq.get(&seq).copied()
            }
            IdentityKind::Provisional { .. } => None,
            IdentityKind::Durable { store, row } if store == self.store => {
                self.key_for_row(row)
            }
            IdentityKind::Durable { .. } => None,
        }
    }

    /// The store this registry binds rows of.
    #[must_use]
    pub fn store(&self) -> StoreId {
        self.store
    }
}
