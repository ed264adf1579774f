//! Entity type declarations.

use super::field::Field;

/// A named record type with an ordered list of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    name: String,
    fields: Vec<Field>,
}

impl EntityType {
    /// Starts a declaration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Value attributes, in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_relationship())
    }

    /// Relationships, in declaration order.
    pub fn relationships(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_relationship())
    }

    /// Attributes that are written to the store.
    pub fn persisted_attributes(&self) -> impl Iterator<Item = &Field> {
        self.attributes().filter(|f| !f.is_transient())
    }

    /// Unique-key attributes.
    pub fn unique_fields(&self) -> impl Iterator<Item = &Field> {
        self.attributes().filter(|f| f.is_unique())
    }
}
