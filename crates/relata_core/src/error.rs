//! Error types for Relata core.

use std::io;
use thiserror::Error;

use crate::schema::SchemaError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by contexts and stores.
///
/// None of these are retried internally. `delete` of a missing or already
/// deleted record is deliberately not an error.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A deny rule blocked a delete, or an update collided on a unique key.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Description of the violated constraint.
        message: String,
    },

    /// Two records from different contexts were linked.
    #[error("cannot relate records across contexts: {message}")]
    CrossContextRelationship {
        /// Description of the offending link.
        message: String,
    },

    /// A record handle is not registered with the context it was used on.
    #[error("record not registered: {message}")]
    NotRegistered {
        /// Description of the unregistered use.
        message: String,
    },

    /// A relationship points at a row that no longer exists.
    #[error("dangling reference through {entity}.{field}")]
    DanglingReference {
        /// Entity owning the relationship.
        entity: String,
        /// Relationship field that was traversed.
        field: String,
    },

    /// Storage backend or journal error.
    #[error("storage error: {0}")]
    Storage(#[from] relata_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] relata_codec::CodecError),

    /// Schema registration failed.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Entity type is not part of the schema.
    #[error("unknown entity type: {name}")]
    UnknownEntity {
        /// Name that was looked up.
        name: String,
    },

    /// Field is not declared on the entity type.
    #[error("unknown field {entity}.{field}")]
    UnknownField {
        /// Entity type name.
        entity: String,
        /// Field name that was looked up.
        field: String,
    },

    /// A value or link does not fit the declared field type.
    #[error("type mismatch on {entity}.{field}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Entity type name.
        entity: String,
        /// Field name.
        field: String,
        /// Declared type.
        expected: String,
        /// What was supplied.
        found: String,
    },

    /// A required attribute was not supplied at insert.
    #[error("missing required attribute {entity}.{field}")]
    MissingAttribute {
        /// Entity type name.
        entity: String,
        /// Field name.
        field: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a constraint violation error.
    pub fn constraint_violation(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    /// Creates a cross-context relationship error.
    pub fn cross_context(message: impl Into<String>) -> Self {
        Self::CrossContextRelationship {
            message: message.into(),
        }
    }

    /// Creates a not-registered error.
    pub fn not_registered(message: impl Into<String>) -> Self {
        Self::NotRegistered {
            message: message.into(),
        }
    }

    /// Creates a dangling reference error.
    pub fn dangling(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::DanglingReference {
            entity: entity.into(),
            field: field.into(),
        }
    }

    /// Creates an unknown entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Creates an unknown field error.
    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            entity: entity.into(),
            field: field.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(
        entity: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            entity: entity.into(),
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns `true` for [`CoreError::ConstraintViolation`].
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_field() {
        let err = CoreError::type_mismatch("Item", "value", "integer", "string");
        assert_eq!(
            err.to_string(),
            "type mismatch on Item.value: expected integer, found string"
        );
        assert_eq!(
            CoreError::dangling("Child", "parent").to_string(),
            "dangling reference through Child.parent"
        );
    }

    #[test]
    fn storage_errors_pass_through() {
        let err: CoreError = relata_storage::StorageError::corrupted(16, "bad magic").into();
        assert!(matches!(err, CoreError::Storage(_)));
        assert!(err.to_string().contains("offset 16"));
    }

    #[test]
    fn constraint_violation_is_detectable() {
        assert!(CoreError::constraint_violation("deny").is_constraint_violation());
        assert!(!CoreError::not_registered("x").is_constraint_violation());
    }
}
