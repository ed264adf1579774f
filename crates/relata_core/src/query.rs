//! Fetch criteria: predicates, sort descriptors and pagination.

use relata_codec::Value;
use std::cmp::Ordering;

pub(crate) static NULL: Value = Value::Null;

/// Read access to a record's attributes for predicate evaluation.
pub trait FieldSource {
    /// The value of `field`, or `None` when the record has no such attribute.
    fn value(&self, field: &str) -> Option<&Value>;
}

impl FieldSource for std::collections::BTreeMap<String, Value> {
    fn value(&self, field: &str) -> Option<&Value> {
        self.get(field)
    }
}

/// A boolean condition over attributes. Missing attributes read as `Null`.
///
/// Ordering comparisons against `Null` are false on either side.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches everything.
    True,
    /// `field == value`.
    Eq(String, Value),
    /// `field != value`.
    Ne(String, Value),
    /// `field < value`.
    Lt(String, Value),
    /// `field <= value`.
    Le(String, Value),
    /// `field > value`.
    Gt(String, Value),
    /// `field >= value`.
    Ge(String, Value),
    /// `field` is null.
    IsNull(String),
    /// All of the predicates.
    And(Vec<Predicate>),
    /// Any of the predicates.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(field.into(), value.into())
    }

    /// `field != value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne(field.into(), value.into())
    }

    /// `field < value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt(field.into(), value.into())
    }

    /// `field <= value`.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Le(field.into(), value.into())
    }

    /// `field > value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt(field.into(), value.into())
    }

    /// `field >= value`.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ge(field.into(), value.into())
    }

    /// `field` is null.
    pub fn is_null(field: impl Into<String>) -> Self {
        Predicate::IsNull(field.into())
    }

    /// Conjunction with another predicate.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::True => other,
            Predicate::And(mut all) => {
                all.push(other);
                Predicate::And(all)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    /// Disjunction with another predicate.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut any) => {
                any.push(other);
                Predicate::Or(any)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Evaluates the predicate against a record.
    pub fn matches(&self, source: &dyn FieldSource) -> bool {
        let read = |field: &str| source.value(field).unwrap_or(&NULL);
        let ordered = |field: &str, value: &Value, accept: fn(Ordering) -> bool| {
            let current = read(field);
            !current.is_null() && !value.is_null() && accept(current.compare(value))
        };

        match self {
            Predicate::True => true,
            Predicate::Eq(field, value) => read(field).compare(value) == Ordering::Equal,
            Predicate::Ne(field, value) => read(field).compare(value) != Ordering::Equal,
            Predicate::Lt(field, value) => ordered(field, value, Ordering::is_lt),
            Predicate::Le(field, value) => ordered(field, value, Ordering::is_le),
            Predicate::Gt(field, value) => ordered(field, value, Ordering::is_gt),
            Predicate::Ge(field, value) => ordered(field, value, Ordering::is_ge),
            Predicate::IsNull(field) => read(field).is_null(),
            Predicate::And(all) => all.iter().all(|p| p.matches(source)),
            Predicate::Or(any) => any.iter().any(|p| p.matches(source)),
            Predicate::Not(inner) => !inner.matches(source),
        }
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::True
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    /// Attribute to sort by.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

impl SortDescriptor {
    /// Sort by `field`, smallest first.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    /// Sort by `field`, largest first.
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }
}

/// Compares two records by a list of sort descriptors.
pub fn compare_by(sort: &[SortDescriptor], a: &dyn FieldSource, b: &dyn FieldSource) -> Ordering {
    for descriptor in sort {
        let left = a.value(&descriptor.field).unwrap_or(&NULL);
        let right = b.value(&descriptor.field).unwrap_or(&NULL);
        let ord = match descriptor.order {
            SortOrder::Ascending => left.compare(right),
            SortOrder::Descending => right.compare(left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Everything a fetch needs: entity, predicate, sort and page.
///
/// ```
/// use relata_core::{FetchDescriptor, Predicate, SortDescriptor};
///
/// let page = FetchDescriptor::new("Item")
///     .filter(Predicate::ge("value", 10))
///     .sort_by(SortDescriptor::ascending("id"))
///     .offset(10)
///     .limit(10);
/// assert_eq!(page.offset, 10);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FetchDescriptor {
    /// Entity type to fetch.
    pub entity: String,
    /// Filter; [`Predicate::True`] matches everything.
    pub predicate: Predicate,
    /// Sort keys, most significant first. Without any, results come in
    /// store order followed by unsaved records in registration order.
    pub sort: Vec<SortDescriptor>,
    /// Results to skip.
    pub offset: usize,
    /// Maximum results to return.
    pub limit: Option<usize>,
}

impl FetchDescriptor {
    /// Fetches every record of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::True,
            sort: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Adds a filter, combined with any existing one.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = std::mem::take(&mut self.predicate).and(predicate);
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn sort_by(mut self, descriptor: SortDescriptor) -> Self {
        self.sort.push(descriptor);
        self
    }

    /// Sets the number of results to skip.
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the maximum number of results.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Applies offset and limit to an already filtered, sorted sequence.
    pub(crate) fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        let take = self.limit.unwrap_or(usize::MAX);
        items.into_iter().skip(self.offset).take(take).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn comparisons() {
        let r = record(&[("value", Value::from(5)), ("name", Value::from("a"))]);
        assert!(Predicate::eq("value", 5).matches(&r));
        assert!(Predicate::ne("value", 4).matches(&r));
        assert!(Predicate::lt("value", 6).matches(&r));
        assert!(Predicate::le("value", 5).matches(&r));
        assert!(!Predicate::gt("value", 5).matches(&r));
        assert!(Predicate::ge("value", 5).matches(&r));
        assert!(Predicate::eq("name", "a").matches(&r));
    }

    #[test]
    fn missing_fields_read_as_null() {
        let r = record(&[]);
        assert!(Predicate::is_null("value").matches(&r));
        assert!(Predicate::eq("value", Value::Null).matches(&r));
        assert!(!Predicate::lt("value", 1).matches(&r));
        assert!(!Predicate::ge("value", 1).matches(&r));
    }

    #[test]
    fn combinators() {
        let r = record(&[("value", Value::from(5))]);
        let p = Predicate::gt("value", 1).and(Predicate::lt("value", 10));
        assert!(p.matches(&r));
        assert!(!p.clone().negate().matches(&r));
        assert!(Predicate::eq("value", 1).or(Predicate::eq("value", 5)).matches(&r));
        assert_eq!(Predicate::True.and(Predicate::is_null("x")), Predicate::is_null("x"));
    }

    #[test]
    fn sort_descriptors_apply_in_order() {
        let a = record(&[("group", Value::from(1)), ("value", Value::from(2))]);
        let b = record(&[("group", Value::from(1)), ("value", Value::from(3))]);
        let sort = [
            SortDescriptor::ascending("group"),
            SortDescriptor::descending("value"),
        ];
        assert_eq!(compare_by(&sort, &a, &b), Ordering::Greater);
        assert_eq!(compare_by(&[], &a, &b), Ordering::Equal);
    }

    #[test]
    fn page_skips_then_takes() {
        let page = FetchDescriptor::new("Item").offset(2).limit(3);
        assert_eq!(page.page((0..10).collect()), vec![2, 3, 4]);
        let unbounded = FetchDescriptor::new("Item").offset(8);
        assert_eq!(unbounded.page((0..10).collect()), vec![8, 9]);
    }
}
