//! Field declarations.

use relata_codec::Value;
use std::fmt;

/// Scalar attribute types.
///
/// Integers are signed 64-bit; unsigned values above `i64::MAX` cannot be
/// stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Boolean.
    Bool,
    /// UTC timestamp.
    Timestamp,
    /// Byte blob.
    Bytes,
    /// UUID.
    Uuid,
    /// Decimal.
    Decimal,
}

impl ScalarType {
    fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ScalarType::String, Value::String(_))
                | (ScalarType::Integer, Value::Integer(_))
                | (ScalarType::Float, Value::Float(_))
                | (ScalarType::Bool, Value::Bool(_))
                | (ScalarType::Timestamp, Value::Timestamp(_))
                | (ScalarType::Bytes, Value::Bytes(_))
                | (ScalarType::Uuid, Value::Uuid(_))
                | (ScalarType::Decimal, Value::Decimal(_))
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::String => "string",
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Bytes => "bytes",
            ScalarType::Uuid => "uuid",
            ScalarType::Decimal => "decimal",
        };
        f.write_str(name)
    }
}

/// Declared type of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    /// A single scalar.
    Scalar(ScalarType),
    /// A list of values of one type.
    List(Box<ValueType>),
    /// The inner type or null.
    Optional(Box<ValueType>),
    /// A nested value object with named fields.
    Composite(Vec<(String, ValueType)>),
    /// A tagged union: each case has a name and the types of its positional
    /// payload. Plain and raw-value enumerations have no payloads and are
    /// stored by case name.
    Variant(Vec<(String, Vec<ValueType>)>),
}

impl ValueType {
    /// Shorthand for [`ValueType::Optional`].
    #[must_use]
    pub fn optional(inner: impl Into<ValueType>) -> Self {
        ValueType::Optional(Box::new(inner.into()))
    }

    /// Shorthand for [`ValueType::List`].
    #[must_use]
    pub fn list(inner: impl Into<ValueType>) -> Self {
        ValueType::List(Box::new(inner.into()))
    }

    /// Builds a composite from `(name, type)` pairs.
    pub fn composite<K, T, I>(fields: I) -> Self
    where
        K: Into<String>,
        T: Into<ValueType>,
        I: IntoIterator<Item = (K, T)>,
    {
        ValueType::Composite(
            fields
                .into_iter()
                .map(|(k, t)| (k.into(), t.into()))
                .collect(),
        )
    }

    /// An enumeration of payload-free cases.
    pub fn enumeration<K, I>(cases: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        ValueType::Variant(cases.into_iter().map(|c| (c.into(), Vec::new())).collect())
    }

    /// A tagged union from `(case, payload types)` pairs.
    pub fn variant<K, I>(cases: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Vec<ValueType>)>,
    {
        ValueType::Variant(cases.into_iter().map(|(c, p)| (c.into(), p)).collect())
    }

    /// Returns whether `value` conforms to this type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueType::Scalar(scalar) => scalar.accepts(value),
            ValueType::Optional(inner) => value.is_null() || inner.accepts(value),
            ValueType::List(inner) => match value {
                Value::List(items) => items.iter().all(|item| inner.accepts(item)),
                _ => false,
            },
            ValueType::Composite(fields) => match value {
                Value::Composite(map) => {
                    map.len() == fields.len()
                        && fields.iter().all(|(name, ty)| {
                            map.get(name).is_some_and(|v| ty.accepts(v))
                        })
                }
                _ => false,
            },
            ValueType::Variant(cases) => match value {
                Value::Variant { case, payload } => cases.iter().any(|(name, types)| {
                    name == case
                        && types.len() == payload.len()
                        && types.iter().zip(payload).all(|(ty, v)| ty.accepts(v))
                }),
                _ => false,
            },
        }
    }

    /// Returns whether the type is `Optional`.
    #[must_use]
    pub fn is_optional(&self) -> bool {
        matches!(self, ValueType::Optional(_))
    }

    /// Returns whether the type is a scalar, possibly optional.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        match self {
            ValueType::Scalar(_) => true,
            ValueType::Optional(inner) => matches!(**inner, ValueType::Scalar(_)),
            _ => false,
        }
    }

    /// Returns whether an `Optional` appears anywhere below this type.
    pub(crate) fn contains_optional(&self) -> bool {
        match self {
            ValueType::Scalar(_) => false,
            ValueType::Optional(_) => true,
            ValueType::List(inner) => inner.contains_optional(),
            ValueType::Composite(fields) => fields.iter().any(|(_, ty)| ty.contains_optional()),
            ValueType::Variant(cases) => cases
                .iter()
                .flat_map(|(_, types)| types)
                .any(ValueType::contains_optional),
        }
    }

    /// Returns whether a composite nested anywhere in this type holds an `Optional`.
    pub(crate) fn has_optional_in_composite(&self) -> bool {
        match self {
            ValueType::Scalar(_) => false,
            ValueType::Optional(inner) | ValueType::List(inner) => {
                inner.has_optional_in_composite()
            }
            ValueType::Composite(fields) => fields.iter().any(|(_, ty)| ty.contains_optional()),
            ValueType::Variant(cases) => cases
                .iter()
                .flat_map(|(_, types)| types)
                .any(ValueType::has_optional_in_composite),
        }
    }
}

impl From<ScalarType> for ValueType {
    fn from(scalar: ScalarType) -> Self {
        ValueType::Scalar(scalar)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Scalar(scalar) => write!(f, "{scalar}"),
            ValueType::List(inner) => write!(f, "[{inner}]"),
            ValueType::Optional(inner) => write!(f, "{inner}?"),
            ValueType::Composite(fields) => {
                f.write_str("{")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                }
                f.write_str("}")
            }
            ValueType::Variant(cases) => {
                for (i, (name, types)) in cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    f.write_str(name)?;
                    if !types.is_empty() {
                        f.write_str("(")?;
                        for (j, ty) in types.iter().enumerate() {
                            if j > 0 {
                                f.write_str(", ")?;
                            }
                            write!(f, "{ty}")?;
                        }
                        f.write_str(")")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// What happens to related records when the owner of a relationship is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeleteRule {
    /// Delete the related records in the same save.
    Cascade,
    /// Clear the related records' back-reference.
    #[default]
    Nullify,
    /// Refuse to save while the relationship has members.
    Deny,
    /// Leave the related records untouched, back-reference included.
    NoAction,
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// At most one related record.
    One,
    /// Any number of related records.
    Many,
}

/// The shape of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A value-typed attribute.
    Attribute(ValueType),
    /// A relationship to another entity type.
    Relationship {
        /// Target entity type.
        target: String,
        /// One or many.
        cardinality: Cardinality,
    },
}

/// A field declaration.
///
/// ```
/// use relata_core::{DeleteRule, Field, ScalarType};
///
/// let id = Field::attribute("id", ScalarType::Integer).unique();
/// let children = Field::to_many("children", "Child")
///     .inverse("parent")
///     .delete_rule(DeleteRule::Cascade);
/// assert!(id.is_unique());
/// assert_eq!(children.declared_inverse(), Some("parent"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    kind: FieldKind,
    unique: bool,
    transient: Option<Value>,
    inverse: Option<String>,
    delete_rule: Option<DeleteRule>,
}

impl Field {
    fn with_kind(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            unique: false,
            transient: None,
            inverse: None,
            delete_rule: None,
        }
    }

    /// Declares a value attribute.
    #[must_use]
    pub fn attribute(name: impl Into<String>, value_type: impl Into<ValueType>) -> Self {
        Self::with_kind(name, FieldKind::Attribute(value_type.into()))
    }

    /// Declares a to-one relationship.
    #[must_use]
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            FieldKind::Relationship {
                target: target.into(),
                cardinality: Cardinality::One,
            },
        )
    }

    /// Declares a to-many relationship.
    #[must_use]
    pub fn to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            FieldKind::Relationship {
                target: target.into(),
                cardinality: Cardinality::Many,
            },
        )
    }

    /// Marks the attribute as a unique key (upsert on insert).
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the attribute as transient: kept in memory, never persisted.
    /// Contexts that load the record from the store see `default`.
    #[must_use]
    pub fn transient(mut self, default: impl Into<Value>) -> Self {
        self.transient = Some(default.into());
        self
    }

    /// Declares the inverse field on the target entity.
    #[must_use]
    pub fn inverse(mut self, field: impl Into<String>) -> Self {
        self.inverse = Some(field.into());
        self
    }

    /// Sets the delete rule (default [`DeleteRule::Nullify`]).
    #[must_use]
    pub fn delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = Some(rule);
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field shape.
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Declared value type, for attributes.
    #[must_use]
    pub fn value_type(&self) -> Option<&ValueType> {
        match &self.kind {
            FieldKind::Attribute(ty) => Some(ty),
            FieldKind::Relationship { .. } => None,
        }
    }

    /// Target entity, for relationships.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relationship { target, .. } => Some(target),
            FieldKind::Attribute(_) => None,
        }
    }

    /// Cardinality, for relationships.
    #[must_use]
    pub fn cardinality(&self) -> Option<Cardinality> {
        match &self.kind {
            FieldKind::Relationship { cardinality, .. } => Some(*cardinality),
            FieldKind::Attribute(_) => None,
        }
    }

    /// Whether this is a relationship.
    #[must_use]
    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, FieldKind::Relationship { .. })
    }

    /// Whether this attribute is a unique key.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether this attribute is transient.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.transient.is_some()
    }

    /// Value a transient attribute starts with.
    #[must_use]
    pub fn transient_default(&self) -> Option<&Value> {
        self.transient.as_ref()
    }

    /// Explicitly declared inverse field, if any.
    #[must_use]
    pub fn declared_inverse(&self) -> Option<&str> {
        self.inverse.as_deref()
    }

    /// Delete rule applied when the owner of this relationship is deleted.
    #[must_use]
    pub fn rule(&self) -> DeleteRule {
        self.delete_rule.unwrap_or_default()
    }

    pub(crate) fn has_declared_rule(&self) -> bool {
        self.delete_rule.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_accepts_null() {
        let ty = ValueType::optional(ScalarType::String);
        assert!(ty.accepts(&Value::Null));
        assert!(ty.accepts(&Value::from("x")));
        assert!(!ty.accepts(&Value::from(1)));
        assert!(!ValueType::from(ScalarType::String).accepts(&Value::Null));
    }

    #[test]
    fn composite_requires_exact_fields() {
        let ty = ValueType::composite([
            ("name", ValueType::from(ScalarType::String)),
            ("age", ValueType::from(ScalarType::Integer)),
        ]);
        let ok = Value::composite([("name", Value::from("a")), ("age", Value::from(3))]);
        let missing = Value::composite([("name", Value::from("a"))]);
        let extra = Value::composite([
            ("name", Value::from("a")),
            ("age", Value::from(3)),
            ("x", Value::Null),
        ]);
        assert!(ty.accepts(&ok));
        assert!(!ty.accepts(&missing));
        assert!(!ty.accepts(&extra));
    }

    #[test]
    fn list_checks_every_element() {
        let ty = ValueType::list(ScalarType::Integer);
        assert!(ty.accepts(&Value::from(vec![Value::from(1), Value::from(2)])));
        assert!(!ty.accepts(&Value::from(vec![Value::from(1), Value::from("2")])));
    }

    #[test]
    fn optional_inside_composite_is_detected() {
        let nested = ValueType::composite([(
            "inner",
            ValueType::composite([("maybe", ValueType::optional(ScalarType::Integer))]),
        )]);
        assert!(nested.has_optional_in_composite());
        assert!(ValueType::list(nested).has_optional_in_composite());

        let top_level = ValueType::optional(ValueType::composite([(
            "plain",
            ValueType::from(ScalarType::Integer),
        )]));
        assert!(!top_level.has_optional_in_composite());
    }

    #[test]
    fn variant_checks_case_and_payload() {
        let ty = ValueType::variant([
            ("foo", vec![ValueType::from(ScalarType::String)]),
            ("qux", vec![ValueType::optional(ScalarType::String)]),
        ]);
        assert!(ty.accepts(&Value::variant("foo", [Value::from("a")])));
        assert!(ty.accepts(&Value::variant("qux", [Value::Null])));
        assert!(!ty.accepts(&Value::variant("foo", [Value::from(1)])));
        assert!(!ty.accepts(&Value::variant("foo", Vec::new())));
        assert!(!ty.accepts(&Value::case("nope")));
        assert!(!ty.accepts(&Value::from("foo")));
        // an optional payload is not an optional inside a composite
        assert!(!ty.has_optional_in_composite());

        let plain = ValueType::enumeration(["foo", "bar"]);
        assert!(plain.accepts(&Value::case("bar")));
        assert_eq!(plain.to_string(), "foo | bar");
        assert_eq!(ty.to_string(), "foo(string) | qux(string?)");
    }

    #[test]
    fn display_is_readable() {
        let ty = ValueType::optional(ValueType::list(ScalarType::Uuid));
        assert_eq!(ty.to_string(), "[uuid]?");
    }

    #[test]
    fn default_rule_is_nullify() {
        assert_eq!(Field::to_one("parent", "Parent").rule(), DeleteRule::Nullify);
    }
}
