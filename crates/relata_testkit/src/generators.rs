//! Property-based test generators using proptest.
//!
//! Provides strategies for generating attribute values, records and
//! context operations against the model catalog.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use relata_core::{Record, Value};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Strategy for timestamps with whole-second precision.
pub fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or_default()
    })
}

/// Strategy for decimals with up to four fractional digits.
pub fn decimal_strategy() -> impl Strategy<Value = Decimal> {
    (any::<i64>(), 0u32..=4).prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale))
}

/// Strategy for scalar values of any supported type, `Null` excluded.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        any::<bool>().prop_map(Value::Bool),
        timestamp_strategy().prop_map(Value::Timestamp),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        any::<u128>().prop_map(|bits| Value::Uuid(Uuid::from_u128(bits))),
        decimal_strategy().prop_map(Value::Decimal),
    ]
}

/// Strategy for a complete `Sample` record, one attribute per type.
pub fn sample_record_strategy() -> impl Strategy<Value = Record> {
    (
        "[a-z]{0,12}",
        any::<i64>(),
        -1.0e6f64..1.0e6,
        any::<bool>(),
        timestamp_strategy(),
        prop::collection::vec(any::<u8>(), 0..16),
        any::<u128>(),
        decimal_strategy(),
        prop::collection::vec("[a-z]{1,6}", 0..4),
        prop::option::of("[a-z]{1,8}"),
    )
        .prop_map(
            |(text, count, ratio, flag, at, blob, uid, price, labels, note)| {
                Record::new("Sample")
                    .set("text", text)
                    .set("count", count)
                    .set("ratio", ratio)
                    .set("flag", flag)
                    .set("at", at)
                    .set("blob", blob)
                    .set("uid", Uuid::from_u128(uid))
                    .set("price", price)
                    .set(
                        "labels",
                        labels.into_iter().map(Value::String).collect::<Vec<_>>(),
                    )
                    .set("note", note.map_or(Value::Null, Value::String))
            },
        )
}

/// Strategy for a set of distinct item ids in `0..bound`, shuffled.
pub fn distinct_ids_strategy(bound: i64, max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(0..bound, 1..max_len)
        .prop_map(|ids| ids.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// One step against a context holding `UniqueItem`s.
#[derive(Debug, Clone)]
pub enum ItemOperation {
    /// Insert `UniqueItem { key, value }`.
    Insert {
        /// Unique key.
        key: String,
        /// Value.
        value: i64,
    },
    /// Save.
    Save,
}

/// Strategy for a single item operation over a small key space so that
/// unique collisions are common.
pub fn item_operation_strategy() -> impl Strategy<Value = ItemOperation> {
    prop_oneof![
        4 => ("[a-d]", any::<i64>()).prop_map(|(key, value)| ItemOperation::Insert { key, value }),
        1 => Just(ItemOperation::Save),
    ]
}

/// Strategy for a sequence of item operations.
pub fn item_operations_strategy(max_len: usize) -> impl Strategy<Value = Vec<ItemOperation>> {
    prop::collection::vec(item_operation_strategy(), 1..max_len)
}

/// Case counts for property tests over whole contexts, which are far more
/// expensive per case than pure value properties.
#[derive(Debug, Clone, Copy)]
pub struct PropTestConfig {
    /// Number of cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Few cases, for properties that open a store per case.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn sample_records_target_the_sample_entity() {
        let mut runner = TestRunner::default();
        let record = sample_record_strategy()
            .new_tree(&mut runner)
            .unwrap()
            .current();
        assert_eq!(record.entity(), "Sample");
        assert!(record.get("labels").is_some());
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn distinct_ids_are_distinct(ids in distinct_ids_strategy(100, 20)) {
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), ids.len());
        }

        #[test]
        fn scalar_values_are_never_null(value in scalar_value_strategy()) {
            prop_assert!(!value.is_null());
        }
    }
}
