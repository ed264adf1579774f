//! Fetching, saving, transactions, autosave and identity.

use relata_core::{CooperativeExecutor, IdentityKind};
use relata_testkit::prelude::*;
use relata_testkit::scenarios::populated_store;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn ids(context: &ModelContext, records: &[RecordRef]) -> Vec<i64> {
    records
        .iter()
        .map(|r| context.get(r, "id").unwrap().as_i64().unwrap())
        .collect()
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

#[test]
fn fetch_reflects_unsaved_changes() {
    let store = populated_store(3);
    let context = store.context();
    let items = context.fetch_all("SimpleItem").unwrap();

    context.set(&items[0], "name", "renamed").unwrap();
    context.delete(&items[1]);
    let extra = context
        .insert(Record::new("SimpleItem").set("id", 99).set("name", "new"))
        .unwrap();

    let renamed = context
        .fetch(&FetchDescriptor::new("SimpleItem").filter(Predicate::eq("name", "renamed")))
        .unwrap();
    assert_eq!(renamed, vec![items[0]]);

    let all = context.fetch_all("SimpleItem").unwrap();
    assert_eq!(all, vec![items[0], items[2], extra]);
    assert_eq!(context.count_all("SimpleItem").unwrap(), 3);

    // nothing reached the store yet
    assert_eq!(store.context().count_all("SimpleItem").unwrap(), 3);
    assert_eq!(
        store
            .context()
            .count(&FetchDescriptor::new("SimpleItem").filter(Predicate::eq("name", "renamed")))
            .unwrap(),
        0
    );
}

#[test]
fn pagination_returns_the_requested_window() {
    let store = populated_store(100);
    let context = store.context();
    let page = FetchDescriptor::new("SimpleItem")
        .sort_by(SortDescriptor::ascending("id"))
        .offset(10)
        .limit(10);

    let records = context.fetch(&page).unwrap();
    assert_eq!(ids(&context, &records), (10..20).collect::<Vec<_>>());
    assert_eq!(context.count(&page).unwrap(), 10);

    let tail = FetchDescriptor::new("SimpleItem").offset(95).limit(10);
    assert_eq!(context.fetch(&tail).unwrap().len(), 5);
    assert_eq!(context.count(&tail).unwrap(), 5);
}

#[test]
fn pagination_applies_after_local_changes() {
    let store = populated_store(20);
    let context = store.context();
    context
        .insert(Record::new("SimpleItem").set("id", -1).set("name", "first"))
        .unwrap();

    let page = FetchDescriptor::new("SimpleItem")
        .sort_by(SortDescriptor::ascending("id"))
        .limit(3);
    let records = context.fetch(&page).unwrap();
    assert_eq!(ids(&context, &records), vec![-1, 0, 1]);

    let descending = FetchDescriptor::new("SimpleItem")
        .sort_by(SortDescriptor::descending("id"))
        .offset(1)
        .limit(2);
    let records = context.fetch(&descending).unwrap();
    assert_eq!(ids(&context, &records), vec![18, 17]);
}

#[test]
fn unique_insert_upserts_within_one_context() {
    with_catalog(|store| {
        let context = store.context();
        let first = context
            .insert(Record::new("UniqueItem").set("key", "a").set("value", 1))
            .unwrap();
        let second = context
            .insert(Record::new("UniqueItem").set("key", "a").set("value", 2))
            .unwrap();

        // both exist until the store reconciles them
        assert_eq!(context.count_all("UniqueItem").unwrap(), 2);
        context.save().unwrap();

        assert!(context.same_record(&first, &second));
        assert_eq!(context.count_all("UniqueItem").unwrap(), 1);
        assert_eq!(context.get(&first, "value").unwrap(), Value::from(2));
        assert!(context.inserted().is_empty());

        let fresh = store.context();
        let items = fresh.fetch_all("UniqueItem").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(fresh.get(&items[0], "value").unwrap(), Value::from(2));
    });
}

#[test]
fn unique_insert_upserts_across_contexts() {
    with_catalog(|store| {
        let first = store.context();
        first
            .insert(Record::new("UniqueItem").set("key", "a").set("value", 1))
            .unwrap();
        first.save().unwrap();

        let second = store.context();
        second
            .insert(Record::new("UniqueItem").set("key", "a").set("value", 2))
            .unwrap();
        second.save().unwrap();

        let fresh = store.context();
        let items = fresh.fetch_all("UniqueItem").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(fresh.get(&items[0], "value").unwrap(), Value::from(2));
    });
}

#[test]
fn failed_transaction_leaves_nothing_behind() {
    with_catalog(|store| {
        let context = store.context();
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&saves);
        context.on_save(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result: CoreResult<()> = context.transaction(|tx| {
            tx.insert(Record::new("SimpleItem").set("id", 1).set("name", "a"))?;
            Err(CoreError::invalid_operation("abort"))
        });

        assert!(result.is_err());
        assert!(!context.has_changes());
        assert_eq!(context.count_all("SimpleItem").unwrap(), 0);
        assert_eq!(saves.load(Ordering::SeqCst), 0);
    });
}

#[test]
fn successful_transaction_saves_once() {
    with_catalog(|store| {
        let context = store.context();
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&saves);
        context.on_save(move |summary| {
            assert_eq!(summary.inserted, 3);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let inserted = context
            .transaction(|tx| {
                tx.insert(Record::new("SimpleItem").set("id", 1).set("name", "a"))?;
                tx.transaction(|inner| {
                    inner.insert(Record::new("SimpleItem").set("id", 2).set("name", "b"))?;
                    inner.insert(Record::new("SimpleItem").set("id", 3).set("name", "c"))?;
                    Ok(())
                })?;
                Ok(tx.inserted().len())
            })
            .unwrap();

        assert_eq!(inserted, 3);
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 3);
    });
}

#[test]
fn autosave_runs_on_the_next_turn_and_coalesces() {
    with_catalog(|store| {
        let executor = Arc::new(CooperativeExecutor::new());
        let context = store.autosave_context(&executor);
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&saves);
        context.on_save(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for id in 0..3 {
            context
                .insert(Record::new("SimpleItem").set("id", id).set("name", "x"))
                .unwrap();
        }
        assert_eq!(executor.pending(), 1);
        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 0);

        assert_eq!(executor.run_until_idle(), 1);
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 3);
        assert!(!context.has_changes());

        // a later mutation schedules again
        let item = context.fetch_all("SimpleItem").unwrap()[0];
        context.set(&item, "name", "y").unwrap();
        assert_eq!(executor.pending(), 1);
        executor.run_until_idle();
        assert_eq!(saves.load(Ordering::SeqCst), 2);
    });
}

#[test]
fn disabled_autosave_schedules_nothing() {
    with_catalog(|store| {
        let executor = Arc::new(CooperativeExecutor::new());
        let context = store.autosave_context(&executor);
        context.set_autosave(false);
        assert!(!context.autosave_enabled());

        context
            .insert(Record::new("SimpleItem").set("id", 1).set("name", "x"))
            .unwrap();
        assert_eq!(executor.pending(), 0);
        executor.run_until_idle();

        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 0);
        assert!(context.has_changes());
    });
}

#[test]
fn autosave_after_the_context_is_dropped_does_nothing() {
    with_catalog(|store| {
        let executor = Arc::new(CooperativeExecutor::new());
        let context = store.autosave_context(&executor);
        context
            .insert(Record::new("SimpleItem").set("id", 1).set("name", "x"))
            .unwrap();
        drop(context);

        assert_eq!(executor.run_until_idle(), 1);
        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 0);
    });
}

#[test]
fn deep_inserted_records_keep_a_provisional_id() {
    with_catalog(|store| {
        let context = store.context();
        let book = context
            .insert(
                Record::new("Book")
                    .set("title", "a")
                    .one("library", Record::new("Library").set("name", "l")),
            )
            .unwrap();
        let library = context.related_one(&book, "library").unwrap().unwrap();
        context.save().unwrap();

        assert!(context.persistent_id(&book).unwrap().is_durable());
        let reported = context.persistent_id(&library).unwrap();
        assert!(matches!(reported.kind(), IdentityKind::Provisional { .. }));
        let canonical = context.canonical_id(&library).unwrap();
        assert!(canonical.is_durable());

        // relationships resolve through the canonical id
        let fetched = context.fetch_by_id(&canonical).unwrap();
        assert_eq!(fetched, Some(library));
    });
}

#[test]
fn ids_from_different_contexts_differ_but_hash_alike() {
    with_catalog(|store| {
        let writer = store.context();
        let item = writer
            .insert(Record::new("SimpleItem").set("id", 1).set("name", "a"))
            .unwrap();
        writer.save().unwrap();
        let written = writer.persistent_id(&item).unwrap();

        let reader = store.context();
        let fetched = reader.fetch_all("SimpleItem").unwrap()[0];
        let read = reader.persistent_id(&fetched).unwrap();

        assert_ne!(written, read);
        assert_eq!(hash_of(&written), hash_of(&read));
        assert!(written.same_row(&read));

        // each context still resolves the other's durable id
        assert_eq!(reader.fetch_by_id(&written).unwrap(), Some(fetched));
    });
}

#[test]
fn fetch_by_id_misses_deleted_records() {
    with_catalog(|store| {
        let context = store.context();
        let item = context
            .insert(Record::new("SimpleItem").set("id", 1).set("name", "a"))
            .unwrap();
        context.save().unwrap();
        let id = context.persistent_id(&item).unwrap();

        context.delete(&item);
        assert_eq!(context.fetch_by_id(&id).unwrap(), None);
        context.save().unwrap();

        assert_eq!(store.context().fetch_by_id(&id).unwrap(), None);
    });
}

#[test]
fn rollback_discards_pending_work() {
    let store = populated_store(2);
    let context = store.context();
    let items = context.fetch_all("SimpleItem").unwrap();

    context.delete(&items[0]);
    context
        .insert(Record::new("SimpleItem").set("id", 7).set("name", "new"))
        .unwrap();
    context.rollback();

    assert!(!context.has_changes());
    assert!(context.deleted().is_empty());
    assert_eq!(context.fetch_all("SimpleItem").unwrap(), items);
    assert!(context.save().unwrap().is_empty());
    assert_eq!(store.context().count_all("SimpleItem").unwrap(), 2);
}

#[test]
fn last_save_wins_across_contexts() {
    let store = populated_store(1);
    let left = store.context();
    let right = store.context();
    let a = left.fetch_all("SimpleItem").unwrap()[0];
    let b = right.fetch_all("SimpleItem").unwrap()[0];

    left.set(&a, "name", "left").unwrap();
    right.set(&b, "name", "right").unwrap();
    left.save().unwrap();
    right.save().unwrap();

    let fresh = store.context();
    let item = fresh.fetch_all("SimpleItem").unwrap()[0];
    assert_eq!(fresh.get(&item, "name").unwrap(), Value::from("right"));
}

#[test]
fn contexts_on_separate_threads_share_one_store() {
    with_catalog(|store| {
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let gateway = Arc::clone(&store.store);
                thread::spawn(move || {
                    let context = ModelContext::new(gateway);
                    for n in 0..25 {
                        context
                            .insert(
                                Record::new("SimpleItem")
                                    .set("id", worker * 100 + n)
                                    .set("name", format!("w{worker}")),
                            )
                            .unwrap();
                    }
                    context.save().unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().inserted, 25);
        }
        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 100);
        assert_eq!(store.sequence().as_u64(), 4);
    });
}
