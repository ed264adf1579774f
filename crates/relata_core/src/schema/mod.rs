//! Entity graph model.
//!
//! A [`Schema`] is built once, validated as a whole, and then shared
//! read-only by the store and every context opened on it.
//!
//! ```
//! use relata_core::{EntityType, Field, ScalarType, Schema};
//!
//! let schema = Schema::builder()
//!     .entity(
//!         EntityType::new("Parent")
//!             .field(Field::attribute("name", ScalarType::String))
//!             .field(Field::to_many("children", "Child")),
//!     )
//!     .entity(
//!         EntityType::new("Child")
//!             .field(Field::attribute("name", ScalarType::String))
//!             .field(Field::to_one("parent", "Parent")),
//!     )
//!     .build()
//!     .unwrap();
//!
//! // the single back-reference is inferred as the inverse
//! assert_eq!(schema.inverse_of("Parent", "children"), Some("parent"));
//! ```

mod entity;
mod field;
mod inverse;

pub use entity::EntityType;
pub use field::{Cardinality, DeleteRule, Field, FieldKind, ScalarType, ValueType};
pub use inverse::InverseResolution;

use crate::error::{CoreError, CoreResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

/// Errors found while validating a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Two entity types share a name.
    #[error("entity {name} declared twice")]
    DuplicateEntity {
        /// The repeated name.
        name: String,
    },

    /// Two fields of one entity share a name.
    #[error("field {entity}.{field} declared twice")]
    DuplicateField {
        /// Entity type name.
        entity: String,
        /// The repeated field name.
        field: String,
    },

    /// A relationship targets an entity that is not in the schema.
    #[error("{entity}.{field} targets unknown entity {target}")]
    UnknownTarget {
        /// Entity type name.
        entity: String,
        /// Relationship field.
        field: String,
        /// Missing target.
        target: String,
    },

    /// An explicit inverse names a field that does not exist.
    #[error("{entity}.{field} declares unknown inverse {inverse}")]
    UnknownInverse {
        /// Entity type name.
        entity: String,
        /// Relationship field.
        field: String,
        /// Missing inverse, qualified with its entity.
        inverse: String,
    },

    /// Explicit inverses disagree or do not fit.
    #[error("invalid inverse for {entity}.{field}: {message}")]
    InverseMismatch {
        /// Entity type name.
        entity: String,
        /// Relationship field.
        field: String,
        /// What is wrong.
        message: String,
    },

    /// A nested value object contains an optional field.
    #[error("{entity}.{field}: optional values inside composite types are not supported")]
    OptionalInComposite {
        /// Entity type name.
        entity: String,
        /// Attribute field.
        field: String,
    },

    /// A modifier was applied to a field it does not fit.
    #[error("{entity}.{field}: {message}")]
    InvalidModifier {
        /// Entity type name.
        entity: String,
        /// Field name.
        field: String,
        /// What is wrong.
        message: String,
    },
}

impl SchemaError {
    fn inverse_mismatch(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InverseMismatch {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    fn invalid_modifier(entity: &str, field: &str, message: impl Into<String>) -> Self {
        Self::InvalidModifier {
            entity: entity.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// A validated set of entity types with resolved inverses.
#[derive(Debug, Clone)]
pub struct Schema {
    entities: BTreeMap<String, EntityType>,
    inverses: HashMap<(String, String), InverseResolution>,
}

static NO_INVERSE: InverseResolution = InverseResolution::None;

impl Schema {
    /// Starts building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Looks up an entity type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] if the name is not registered.
    pub fn entity(&self, name: &str) -> CoreResult<&EntityType> {
        self.entities
            .get(name)
            .ok_or_else(|| CoreError::unknown_entity(name))
    }

    /// Looks up a field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] or [`CoreError::UnknownField`].
    pub fn field(&self, entity: &str, field: &str) -> CoreResult<&Field> {
        self.entity(entity)?
            .get(field)
            .ok_or_else(|| CoreError::unknown_field(entity, field))
    }

    /// Looks up a relationship field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if the field is missing, or
    /// [`CoreError::TypeMismatch`] if it is an attribute.
    pub fn relationship(&self, entity: &str, field: &str) -> CoreResult<&Field> {
        let found = self.field(entity, field)?;
        if found.is_relationship() {
            Ok(found)
        } else {
            Err(CoreError::type_mismatch(
                entity,
                field,
                "relationship",
                "attribute",
            ))
        }
    }

    /// Looks up a value attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownField`] if the field is missing, or
    /// [`CoreError::TypeMismatch`] if it is a relationship.
    pub fn attribute(&self, entity: &str, field: &str) -> CoreResult<&Field> {
        let found = self.field(entity, field)?;
        if found.is_relationship() {
            Err(CoreError::type_mismatch(
                entity,
                field,
                "attribute",
                "relationship",
            ))
        } else {
            Ok(found)
        }
    }

    /// All entity types, ordered by name.
    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.values()
    }

    /// How the inverse of `entity.field` was resolved.
    #[must_use]
    pub fn inverse_resolution(&self, entity: &str, field: &str) -> &InverseResolution {
        self.inverses
            .get(&(entity.to_string(), field.to_string()))
            .unwrap_or(&NO_INVERSE)
    }

    /// The inverse of `entity.field`, explicit or inferred.
    #[must_use]
    pub fn inverse_of(&self, entity: &str, field: &str) -> Option<&str> {
        self.inverse_resolution(entity, field).field()
    }

    /// Whether `entity.field` and its inverse are both to-many.
    #[must_use]
    pub fn is_many_to_many(&self, entity: &str, field: &str) -> bool {
        let Ok(forward) = self.field(entity, field) else {
            return false;
        };
        let (Some(target), Some(inverse)) = (forward.target(), self.inverse_of(entity, field))
        else {
            return false;
        };
        let backward = self.field(target, inverse).ok().and_then(Field::cardinality);
        forward.cardinality() == Some(Cardinality::Many) && backward == Some(Cardinality::Many)
    }

    /// Whether `entity.field` is a to-one relationship whose inverse is also
    /// to-one.
    #[must_use]
    pub fn is_one_to_one(&self, entity: &str, field: &str) -> bool {
        let Ok(forward) = self.field(entity, field) else {
            return false;
        };
        let (Some(target), Some(inverse)) = (forward.target(), self.inverse_of(entity, field))
        else {
            return false;
        };
        let backward = self.field(target, inverse).ok().and_then(Field::cardinality);
        forward.cardinality() == Some(Cardinality::One) && backward == Some(Cardinality::One)
    }
}

/// Collects entity types and validates them into a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityType>,
}

impl SchemaBuilder {
    /// Adds an entity type.
    #[must_use]
    pub fn entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validates the declarations and resolves inverses.
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut entities = BTreeMap::new();
        for entity in self.entities {
            validate_fields(&entity)?;
            let name = entity.name().to_string();
            if entities.insert(name.clone(), entity).is_some() {
                return Err(SchemaError::DuplicateEntity { name });
            }
        }

        let inverses = inverse::resolve(&entities)?;
        Ok(Schema { entities, inverses })
    }
}

fn validate_fields(entity: &EntityType) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for field in entity.fields() {
        if !seen.insert(field.name()) {
            return Err(SchemaError::DuplicateField {
                entity: entity.name().to_string(),
                field: field.name().to_string(),
            });
        }

        match field.kind() {
            FieldKind::Attribute(ty) => {
                if ty.has_optional_in_composite() {
                    return Err(SchemaError::OptionalInComposite {
                        entity: entity.name().to_string(),
                        field: field.name().to_string(),
                    });
                }
                if field.declared_inverse().is_some() || field.has_declared_rule() {
                    return Err(SchemaError::invalid_modifier(
                        entity.name(),
                        field.name(),
                        "inverse and delete rule apply to relationships only",
                    ));
                }
                if field.is_unique() && (field.is_transient() || !ty.is_scalar()) {
                    return Err(SchemaError::invalid_modifier(
                        entity.name(),
                        field.name(),
                        "unique keys must be persisted scalars",
                    ));
                }
                if let Some(default) = field.transient_default() {
                    if !ty.accepts(default) {
                        return Err(SchemaError::invalid_modifier(
                            entity.name(),
                            field.name(),
                            format!("transient default {} is not a {ty}", default.type_name()),
                        ));
                    }
                }
            }
            FieldKind::Relationship { .. } => {
                if field.is_unique() || field.is_transient() {
                    return Err(SchemaError::invalid_modifier(
                        entity.name(),
                        field.name(),
                        "unique and transient apply to attributes only",
                    ));
                }
            }
        }
    }
    Ok(())
}
