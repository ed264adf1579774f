//! Detached records and registered record handles.

use crate::types::ContextId;
use relata_codec::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Slot of a record in its context's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey(pub(crate) usize);

impl RecordKey {
    /// Returns the raw slot index.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// A handle to a record registered with a context.
///
/// Handles are cheap to copy. They are only meaningful to the context that
/// issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordRef {
    context: ContextId,
    key: RecordKey,
}

impl RecordRef {
    pub(crate) const fn new(context: ContextId, key: RecordKey) -> Self {
        Self { context, key }
    }

    /// The context that issued this handle.
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// The arena slot within that context.
    #[must_use]
    pub const fn key(&self) -> RecordKey {
        self.key
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.context, self.key.0)
    }
}

/// A relationship endpoint inside a detached record.
#[derive(Debug, Clone)]
pub enum Link {
    /// A record not yet registered; it is deep-inserted with its owner.
    New(Record),
    /// A record already registered with the context.
    Existing(RecordRef),
}

impl From<Record> for Link {
    fn from(record: Record) -> Self {
        Link::New(record)
    }
}

impl From<RecordRef> for Link {
    fn from(record: RecordRef) -> Self {
        Link::Existing(record)
    }
}

impl From<&RecordRef> for Link {
    fn from(record: &RecordRef) -> Self {
        Link::Existing(*record)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum RelationInit {
    One(Link),
    Many(Vec<Link>),
}

/// A record that has not been handed to a context.
///
/// It has no identity yet and can only reach other records through the
/// links it carries, which are registered along with it.
///
/// ```
/// use relata_core::Record;
///
/// let parent = Record::new("Parent")
///     .set("name", "p")
///     .many("children", [Record::new("Child").set("name", "c")]);
/// assert_eq!(parent.entity(), "Parent");
/// ```
#[derive(Debug, Clone)]
pub struct Record {
    entity: String,
    pub(crate) attributes: BTreeMap<String, Value>,
    pub(crate) relations: Vec<(String, RelationInit)>,
}

impl Record {
    /// Starts a record of the given entity type.
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            attributes: BTreeMap::new(),
            relations: Vec::new(),
        }
    }

    /// Sets an attribute.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    /// Sets a to-one relationship.
    #[must_use]
    pub fn one(mut self, field: impl Into<String>, link: impl Into<Link>) -> Self {
        self.relations
            .push((field.into(), RelationInit::One(link.into())));
        self
    }

    /// Sets a to-many relationship.
    #[must_use]
    pub fn many<L, I>(mut self, field: impl Into<String>, links: I) -> Self
    where
        L: Into<Link>,
        I: IntoIterator<Item = L>,
    {
        let links = links.into_iter().map(Into::into).collect();
        self.relations.push((field.into(), RelationInit::Many(links)));
        self
    }

    /// Updates an attribute in place.
    pub fn put(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(field.into(), value.into());
    }

    /// Entity type name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Reads an attribute set on this record.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        BTreeMap<String, Value>,
        Vec<(String, RelationInit)>,
    ) {
        (self.entity, self.attributes, self.relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_fields() {
        let mut record = Record::new("Item").set("value", 1).set("name", "a");
        record.put("value", 2);
        assert_eq!(record.get("value"), Some(&Value::from(2)));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn nested_links_are_kept_in_order() {
        let record = Record::new("Parent")
            .one("favorite", Record::new("Child"))
            .many("children", [Record::new("Child"), Record::new("Child")]);
        assert_eq!(record.relations.len(), 2);
        assert!(matches!(&record.relations[1].1, RelationInit::Many(links) if links.len() == 2));
    }
}
