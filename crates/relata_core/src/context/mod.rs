//! The unit-of-work context.
//!
//! A [`ModelContext`] owns an arena of records, the identity registry that
//! names them, and the pending-change bookkeeping. Records are addressed
//! through [`RecordRef`] handles; every read and write goes through the
//! context, which is what lets it maintain inverse relationships and track
//! what a save has to send to the gateway.
//!
//! A context is meant to be driven by one thread at a time. Handles and the
//! context itself are `Send`, and clones of a context share state.

mod executor;
mod fetch;
mod save;

pub use executor::{CooperativeExecutor, Executor, Task};
pub use save::SaveSummary;

use crate::config::ContextOptions;
use crate::error::{CoreError, CoreResult};
use crate::gateway::PersistenceGateway;
use crate::graph::{propagator, Arena, Entry, EntryState, Origin, Slot};
use crate::identity::{IdentityRegistry, PersistentId};
use crate::record::{Link, Record, RecordKey, RecordRef, RelationInit};
use crate::schema::{Cardinality, Field, Schema};
use crate::types::ContextId;
use parking_lot::Mutex;
use relata_codec::Value;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

type SaveListener = Box<dyn Fn(&SaveSummary) + Send + Sync>;

pub(crate) struct ContextState {
    pub(crate) arena: Arena,
    pub(crate) identity: IdentityRegistry,
    autosave: bool,
    scheduled: bool,
    depth: usize,
}

struct Shared {
    id: ContextId,
    gateway: Arc<dyn PersistenceGateway>,
    schema: Arc<Schema>,
    executor: Option<Arc<dyn Executor>>,
    state: Mutex<ContextState>,
    listeners: Mutex<Vec<SaveListener>>,
}

/// An in-memory unit of work over a [`PersistenceGateway`].
///
/// ```
/// use relata_core::{
///     EntityType, Field, ModelContext, Record, ScalarType, Schema, Store, StoreConfiguration,
/// };
/// use std::sync::Arc;
///
/// let schema = Schema::builder()
///     .entity(EntityType::new("Item").field(Field::attribute("value", ScalarType::Integer)))
///     .build()
///     .unwrap();
/// let store = Arc::new(Store::open(StoreConfiguration::in_memory(), Arc::new(schema)).unwrap());
///
/// let context = ModelContext::new(store.clone());
/// let item = context.insert(Record::new("Item").set("value", 1)).unwrap();
/// assert!(context.has_changes());
/// context.save().unwrap();
///
/// context.set(&item, "value", 2).unwrap();
/// assert_eq!(context.updated().len(), 1);
///
/// let other = ModelContext::new(store);
/// assert_eq!(other.count_all("Item").unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct ModelContext {
    shared: Arc<Shared>,
}

impl fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelContext")
            .field("id", &self.shared.id)
            .field("store", &self.shared.gateway.store_id())
            .finish_non_exhaustive()
    }
}

impl ModelContext {
    /// Creates a context with autosave off and no executor.
    pub fn new(gateway: Arc<dyn PersistenceGateway>) -> Self {
        Self::build(gateway, None, ContextOptions::default())
    }

    /// Creates a context whose autosaves are scheduled on `executor`.
    pub fn with_executor(
        gateway: Arc<dyn PersistenceGateway>,
        executor: Arc<dyn Executor>,
        options: ContextOptions,
    ) -> Self {
        Self::build(gateway, Some(executor), options)
    }

    fn build(
        gateway: Arc<dyn PersistenceGateway>,
        executor: Option<Arc<dyn Executor>>,
        options: ContextOptions,
    ) -> Self {
        let id = ContextId::next();
        let schema = Arc::clone(gateway.schema());
        let identity = IdentityRegistry::new(id, gateway.store_id());
        Self {
            shared: Arc::new(Shared {
                id,
                gateway,
                schema,
                executor,
                state: Mutex::new(ContextState {
                    arena: Arena::default(),
                    identity,
                    autosave: options.autosave,
                    scheduled: false,
                    depth: 0,
                }),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// This context's id, the lineage of the identifiers it mints.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    /// The schema of the underlying store.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.shared.schema
    }

    /// The gateway this context saves through.
    #[must_use]
    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.shared.gateway
    }

    fn handle(&self, key: RecordKey) -> RecordRef {
        RecordRef::new(self.shared.id, key)
    }

    /// The key of a handle issued by this context.
    fn own(&self, state: &ContextState, record: &RecordRef) -> CoreResult<RecordKey> {
        if record.context() != self.shared.id || record.key().as_usize() >= state.arena.len() {
            return Err(CoreError::not_registered(format!(
                "{record} is not registered with {}",
                self.shared.id
            )));
        }
        Ok(state.arena.resolve(record.key()))
    }

    /// The key of a live record of this context.
    fn live(&self, state: &ContextState, record: &RecordRef) -> CoreResult<RecordKey> {
        let key = self.own(state, record)?;
        if state.arena.is_live(key) {
            Ok(key)
        } else {
            Err(CoreError::not_registered(format!("{record} has been deleted")))
        }
    }

    /// The key of a record that may be linked to from this context.
    fn linkable(&self, state: &ContextState, record: &RecordRef) -> CoreResult<RecordKey> {
        if record.context() != self.shared.id {
            return Err(CoreError::cross_context(format!(
                "{record} belongs to {}, not {}",
                record.context(),
                self.shared.id
            )));
        }
        self.live(state, record)
    }

    fn check_value(entity: &str, field: &Field, value: &Value) -> CoreResult<()> {
        match field.value_type() {
            Some(ty) if ty.accepts(value) => Ok(()),
            Some(ty) => Err(CoreError::type_mismatch(
                entity,
                field.name(),
                ty.to_string(),
                value.type_name(),
            )),
            None => Err(CoreError::type_mismatch(
                entity,
                field.name(),
                "attribute",
                "relationship",
            )),
        }
    }

    // ---------------------------------------------------------------------
    // Insert and delete
    // ---------------------------------------------------------------------

    /// Registers a record, and every detached record it links to, as pending
    /// inserts. Inserting a handle this context already tracks does nothing.
    ///
    /// # Errors
    ///
    /// Validation errors ([`CoreError::UnknownField`],
    /// [`CoreError::TypeMismatch`], [`CoreError::MissingAttribute`]) leave
    /// the context untouched. Links to handles of another context fail with
    /// [`CoreError::CrossContextRelationship`].
    pub fn insert(&self, record: impl Into<Link>) -> CoreResult<RecordRef> {
        let key = {
            let mut state = self.shared.state.lock();
            match record.into() {
                Link::Existing(existing) => return Ok(self.handle(self.linkable(&state, &existing)?)),
                Link::New(record) => {
                    self.validate(&state, &record)?;
                    self.register(&mut state, record, Origin::Direct)?
                }
            }
        };
        self.schedule_autosave();
        Ok(self.handle(key))
    }

    fn validate(&self, state: &ContextState, record: &Record) -> CoreResult<()> {
        let schema = &self.shared.schema;
        let entity = schema.entity(record.entity())?;

        for (name, value) in &record.attributes {
            let field = schema.attribute(entity.name(), name)?;
            Self::check_value(entity.name(), field, value)?;
        }
        for field in entity.attributes() {
            let required = field.value_type().is_some_and(|ty| !ty.is_optional());
            if required && !field.is_transient() && !record.attributes.contains_key(field.name()) {
                return Err(CoreError::MissingAttribute {
                    entity: entity.name().to_string(),
                    field: field.name().to_string(),
                });
            }
        }

        for (name, init) in &record.relations {
            let field = schema.relationship(entity.name(), name)?;
            let links: Vec<&Link> = match (init, field.cardinality()) {
                (RelationInit::One(link), Some(Cardinality::One)) => vec![link],
                (RelationInit::Many(links), Some(Cardinality::Many)) => links.iter().collect(),
                (RelationInit::One(_), _) => {
                    return Err(CoreError::type_mismatch(entity.name(), name, "to-many", "to-one"))
                }
                (RelationInit::Many(_), _) => {
                    return Err(CoreError::type_mismatch(entity.name(), name, "to-one", "to-many"))
                }
            };
            let target = field.target().unwrap_or_default();
            for link in links {
                let found = match link {
                    Link::New(nested) => {
                        self.validate(state, nested)?;
                        nested.entity().to_string()
                    }
                    Link::Existing(existing) => {
                        let key = self.linkable(state, existing)?;
                        state
                            .arena
                            .get(key)
                            .map(|e| e.entity.clone())
                            .unwrap_or_default()
                    }
                };
                if found != target {
                    return Err(CoreError::type_mismatch(entity.name(), name, target, found));
                }
            }
        }
        Ok(())
    }

    fn register(
        &self,
        state: &mut ContextState,
        record: Record,
        origin: Origin,
    ) -> CoreResult<RecordKey> {
        let schema = &self.shared.schema;
        let (entity, attributes, relations) = record.into_parts();
        let entity_type = schema.entity(&entity)?;

        let mut entry = Entry::new(entity.as_str(), origin);
        for field in entity_type.attributes() {
            if let Some(default) = field.transient_default() {
                entry.attributes.insert(field.name().to_string(), default.clone());
            }
        }
        entry.attributes.extend(attributes);
        let key = state.arena.push(entry);
        state.identity.mint(key, &entity);

        for (field, init) in relations {
            let links = match init {
                RelationInit::One(link) => vec![link],
                RelationInit::Many(links) => links,
            };
            for link in links {
                let target = match link {
                    Link::New(nested) => self.register(state, nested, Origin::DeepInsert)?,
                    Link::Existing(existing) => state.arena.resolve(existing.key()),
                };
                propagator::link(schema, &mut state.arena, key, &field, target)?;
            }
        }
        Ok(key)
    }

    /// Marks a record for deletion at the next save.
    ///
    /// Deleting a record that was never saved cancels its insert. Deleting
    /// twice, or passing a handle this context does not know, does nothing.
    pub fn delete(&self, record: &RecordRef) {
        let marked = {
            let mut state = self.shared.state.lock();
            if record.context() != self.shared.id {
                return;
            }
            match state.arena.get_mut(record.key()) {
                Some(entry) if entry.state != EntryState::PendingDelete => {
                    entry.state = EntryState::PendingDelete;
                    true
                }
                _ => false,
            }
        };
        if marked {
            self.schedule_autosave();
        }
    }

    // ---------------------------------------------------------------------
    // Attributes
    // ---------------------------------------------------------------------

    /// Reads an attribute. Unset optional attributes read as `Null`.
    /// Attributes of deleted records stay readable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotRegistered`] for foreign handles and
    /// [`CoreError::UnknownField`] for undeclared fields.
    pub fn get(&self, record: &RecordRef, field: &str) -> CoreResult<Value> {
        let state = self.shared.state.lock();
        let key = self.own(&state, record)?;
        let entry = state
            .arena
            .any(key)
            .ok_or_else(|| CoreError::not_registered(format!("{record} was discarded")))?;
        self.shared.schema.attribute(&entry.entity, field)?;
        Ok(entry.attributes.get(field).cloned().unwrap_or(Value::Null))
    }

    /// Writes an attribute. Writing a transient attribute does not make the
    /// record dirty.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotRegistered`] for foreign or deleted records,
    /// [`CoreError::UnknownField`] and [`CoreError::TypeMismatch`] for bad
    /// writes.
    pub fn set(&self, record: &RecordRef, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        let dirty = {
            let mut state = self.shared.state.lock();
            let key = self.live(&state, record)?;
            let Some(entry) = state.arena.get_mut(key) else {
                return Err(CoreError::not_registered(format!("{record} has been deleted")));
            };
            let declared = self.shared.schema.attribute(&entry.entity, field)?;
            Self::check_value(&entry.entity, declared, &value)?;
            entry.attributes.insert(field.to_string(), value);
            if declared.is_transient() {
                false
            } else {
                entry.touch();
                true
            }
        };
        if dirty {
            self.schedule_autosave();
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Relationships
    // ---------------------------------------------------------------------

    fn traverse(
        &self,
        state: &ContextState,
        record: &RecordRef,
        field: &str,
        expected: Cardinality,
    ) -> CoreResult<Vec<RecordRef>> {
        let key = self.live(state, record)?;
        let Some(owner) = state.arena.get(key) else {
            return Err(CoreError::not_registered(format!("{record} has been deleted")));
        };
        let declared = self.shared.schema.relationship(&owner.entity, field)?;
        if declared.cardinality() != Some(expected) {
            let (want, found) = match expected {
                Cardinality::One => ("to-one", "to-many"),
                Cardinality::Many => ("to-many", "to-one"),
            };
            return Err(CoreError::type_mismatch(&owner.entity, field, want, found));
        }

        if owner.dangling.get(field).is_some_and(|rows| !rows.is_empty()) {
            return Err(CoreError::dangling(&owner.entity, field));
        }
        let mut related = Vec::new();
        for target in owner.related(field) {
            let target = state.arena.resolve(*target);
            match state.arena.slot(target) {
                Some(Slot::Live(_)) => related.push(self.handle(target)),
                Some(Slot::Removed(entry)) if entry.row.is_some() => {
                    return Err(CoreError::dangling(&owner.entity, field));
                }
                _ => {}
            }
        }
        Ok(related)
    }

    /// The record a to-one relationship points at.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DanglingReference`] when the related row was
    /// deleted underneath a no-action relationship, and
    /// [`CoreError::NotRegistered`] when `record` itself was deleted.
    pub fn related_one(&self, record: &RecordRef, field: &str) -> CoreResult<Option<RecordRef>> {
        let state = self.shared.state.lock();
        Ok(self
            .traverse(&state, record, field, Cardinality::One)?
            .into_iter()
            .next())
    }

    /// The records a to-many relationship holds, in link order.
    ///
    /// # Errors
    ///
    /// Same as [`ModelContext::related_one`].
    pub fn related_many(&self, record: &RecordRef, field: &str) -> CoreResult<Vec<RecordRef>> {
        let state = self.shared.state.lock();
        self.traverse(&state, record, field, Cardinality::Many)
    }

    /// Sets a to-one relationship or appends to a to-many one, updating the
    /// inverse. A detached record is deep-inserted first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CrossContextRelationship`] when `target` belongs
    /// to another context, and [`CoreError::TypeMismatch`] when it is not of
    /// the field's target type.
    pub fn link(
        &self,
        owner: &RecordRef,
        field: &str,
        target: impl Into<Link>,
    ) -> CoreResult<RecordRef> {
        let target = {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let owner = self.live(state, owner)?;
            let target = match target.into() {
                Link::Existing(existing) => self.linkable(state, &existing)?,
                Link::New(record) => {
                    let owner_entity = state
                        .arena
                        .get(owner)
                        .map(|entry| entry.entity.clone())
                        .unwrap_or_default();
                    let declared = self.shared.schema.relationship(&owner_entity, field)?;
                    let expected = declared.target().unwrap_or_default();
                    if record.entity() != expected {
                        return Err(CoreError::type_mismatch(
                            owner_entity,
                            field,
                            expected,
                            record.entity(),
                        ));
                    }
                    self.validate(state, &record)?;
                    self.register(state, record, Origin::DeepInsert)?
                }
            };
            propagator::link(&self.shared.schema, &mut state.arena, owner, field, target)?;
            target
        };
        self.schedule_autosave();
        Ok(self.handle(target))
    }

    /// Removes `target` from a relationship, updating the inverse.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CrossContextRelationship`] when `target` belongs
    /// to another context.
    pub fn unlink(&self, owner: &RecordRef, field: &str, target: &RecordRef) -> CoreResult<()> {
        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let owner = self.live(state, owner)?;
            if target.context() != self.shared.id {
                return Err(CoreError::cross_context(format!(
                    "{target} belongs to {}",
                    target.context()
                )));
            }
            let target = self.own(state, target)?;
            propagator::unlink(&self.shared.schema, &mut state.arena, owner, field, target)?;
        }
        self.schedule_autosave();
        Ok(())
    }

    /// Empties a relationship, updating every inverse.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotRegistered`] for foreign or deleted owners.
    pub fn clear(&self, owner: &RecordRef, field: &str) -> CoreResult<()> {
        {
            let mut guard = self.shared.state.lock();
            let state = &mut *guard;
            let owner = self.live(state, owner)?;
            propagator::clear(&self.shared.schema, &mut state.arena, owner, field)?;
        }
        self.schedule_autosave();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Identity
    // ---------------------------------------------------------------------

    /// The identifier the record reports about itself.
    ///
    /// For a record that was deep-inserted, this stays the provisional
    /// identifier after save, while [`ModelContext::canonical_id`] becomes
    /// durable.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotRegistered`] for foreign handles.
    pub fn persistent_id(&self, record: &RecordRef) -> CoreResult<PersistentId> {
        let state = self.shared.state.lock();
        self.own(&state, record)?;
        state
            .identity
            .minted(record.key())
            .cloned()
            .ok_or_else(|| CoreError::not_registered(record.to_string()))
    }

    /// The identifier relationships and fetches see for the record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotRegistered`] for foreign handles.
    pub fn canonical_id(&self, record: &RecordRef) -> CoreResult<PersistentId> {
        let state = self.shared.state.lock();
        self.own(&state, record)?;
        state
            .identity
            .canonical(record.key())
            .cloned()
            .ok_or_else(|| CoreError::not_registered(record.to_string()))
    }

    /// Whether two handles of this context denote the same record, after
    /// unique-key merges.
    #[must_use]
    pub fn same_record(&self, a: &RecordRef, b: &RecordRef) -> bool {
        let state = self.shared.state.lock();
        a.context() == b.context()
            && a.context() == self.shared.id
            && state.arena.resolve(a.key()) == state.arena.resolve(b.key())
    }

    // ---------------------------------------------------------------------
    // Pending changes
    // ---------------------------------------------------------------------

    fn pending(&self, wanted: EntryState) -> Vec<RecordRef> {
        let state = self.shared.state.lock();
        state
            .arena
            .live()
            .filter(|(_, entry)| entry.state == wanted)
            .map(|(key, _)| self.handle(key))
            .collect()
    }

    /// Whether anything is waiting to be saved.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        let state = self.shared.state.lock();
        let dirty = state.arena.live().any(|(_, entry)| entry.is_pending());
        dirty
    }

    /// Records waiting to be inserted, in registration order.
    #[must_use]
    pub fn inserted(&self) -> Vec<RecordRef> {
        self.pending(EntryState::PendingInsert)
    }

    /// Saved records with unsaved changes.
    #[must_use]
    pub fn updated(&self) -> Vec<RecordRef> {
        self.pending(EntryState::PendingUpdate)
    }

    /// Records marked for deletion.
    #[must_use]
    pub fn deleted(&self) -> Vec<RecordRef> {
        self.pending(EntryState::PendingDelete)
    }

    // ---------------------------------------------------------------------
    // Transactions and autosave
    // ---------------------------------------------------------------------

    /// Runs `body` as one unit: on `Err` every change it made is undone, on
    /// `Ok` the outermost transaction saves once. Autosave does not fire for
    /// changes made inside.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or the error of the closing save.
    pub fn transaction<T, F>(&self, body: F) -> CoreResult<T>
    where
        F: FnOnce(&ModelContext) -> CoreResult<T>,
    {
        let snapshot = {
            let mut state = self.shared.state.lock();
            state.depth += 1;
            (state.arena.clone(), state.identity.clone())
        };

        let result = body(self);

        let outermost = {
            let mut state = self.shared.state.lock();
            state.depth -= 1;
            if result.is_err() {
                state.arena = snapshot.0;
                state.identity = snapshot.1;
            }
            state.depth == 0
        };

        let value = result?;
        if outermost {
            self.save()?;
        }
        Ok(value)
    }

    /// Turns autosave on or off. Without an executor, autosave never fires.
    pub fn set_autosave(&self, enabled: bool) {
        self.shared.state.lock().autosave = enabled;
    }

    /// Whether autosave is on.
    #[must_use]
    pub fn autosave_enabled(&self) -> bool {
        self.shared.state.lock().autosave
    }

    /// Registers a callback run after every successful save, including
    /// autosaves and transaction saves.
    pub fn on_save(&self, listener: impl Fn(&SaveSummary) + Send + Sync + 'static) {
        self.shared.listeners.lock().push(Box::new(listener));
    }

    /// Schedules one save on the executor; further mutations before it runs
    /// share it.
    fn schedule_autosave(&self) {
        let Some(executor) = self.shared.executor.as_ref() else {
            return;
        };
        {
            let mut state = self.shared.state.lock();
            if !state.autosave || state.depth > 0 || state.scheduled {
                return;
            }
            state.scheduled = true;
        }

        let weak = Arc::downgrade(&self.shared);
        executor.spawn(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                ModelContext { shared }.run_autosave();
            }
        }));
    }

    fn run_autosave(&self) {
        let due = {
            let mut state = self.shared.state.lock();
            state.scheduled = false;
            state.autosave && state.arena.live().any(|(_, entry)| entry.is_pending())
        };
        if due {
            if let Err(err) = self.save() {
                warn!(context = %self.shared.id, error = %err, "autosave failed");
            }
        }
    }
}
