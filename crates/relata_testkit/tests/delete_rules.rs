//! Cascade, nullify, deny and no-action.

use relata_testkit::prelude::*;

fn count(context: &ModelContext, entity: &str) -> usize {
    context.count_all(entity).unwrap()
}

#[test]
fn cascade_one_to_many_from_deep_inserted_owner() {
    with_catalog(|store| {
        let context = store.context();
        let first = context
            .insert(
                Record::new("Book")
                    .set("title", "a")
                    .one("library", Record::new("Library").set("name", "central")),
            )
            .unwrap();
        let library = context.related_one(&first, "library").unwrap().unwrap();
        context
            .insert(Record::new("Book").set("title", "b").one("library", library))
            .unwrap();
        context.save().unwrap();
        assert_eq!(count(&context, "Book"), 2);

        context.delete(&library);
        let summary = context.save().unwrap();

        assert_eq!(summary.cascaded, 2);
        assert_eq!(count(&context, "Book"), 0);
        assert_eq!(count(&store.context(), "Book"), 0);
    });
}

#[test]
fn directly_inserted_owner_does_not_cascade() {
    with_catalog(|store| {
        let context = store.context();
        let library = context
            .insert(Record::new("Library").set("name", "central").many(
                "books",
                [
                    Record::new("Book").set("title", "a"),
                    Record::new("Book").set("title", "b"),
                ],
            ))
            .unwrap();
        let books = context.related_many(&library, "books").unwrap();
        context.save().unwrap();

        context.delete(&library);
        context.save().unwrap();

        assert_eq!(count(&context, "Book"), 2);
        for book in &books {
            assert_eq!(context.related_one(book, "library").unwrap(), None);
        }
        let fresh = store.context();
        for book in fresh.fetch_all("Book").unwrap() {
            assert_eq!(fresh.related_one(&book, "library").unwrap(), None);
        }
    });
}

#[test]
fn fetched_owner_cascades() {
    with_catalog(|store| {
        let writer = store.context();
        writer
            .insert(
                Record::new("Library")
                    .set("name", "central")
                    .many("books", [Record::new("Book").set("title", "a")]),
            )
            .unwrap();
        writer.save().unwrap();

        let context = store.context();
        let library = context.fetch_all("Library").unwrap()[0];
        context.delete(&library);
        context.save().unwrap();

        assert_eq!(count(&store.context(), "Book"), 0);
    });
}

#[test]
fn cascade_one_to_one() {
    with_catalog(|store| {
        let context = store.context();
        let engine = context
            .insert(
                Record::new("Engine")
                    .set("serial", "e1")
                    .one("car", Record::new("Car").set("model", "deep")),
            )
            .unwrap();
        let car = context.related_one(&engine, "car").unwrap().unwrap();
        context
            .insert(
                Record::new("Car")
                    .set("model", "direct")
                    .one("engine", Record::new("Engine").set("serial", "e2")),
            )
            .unwrap();
        context.save().unwrap();

        context.delete(&car);
        context.save().unwrap();
        assert_eq!(count(&context, "Engine"), 1);

        let direct = context.fetch_all("Car").unwrap()[0];
        context.delete(&direct);
        context.save().unwrap();
        assert_eq!(count(&context, "Car"), 0);
        assert_eq!(count(&context, "Engine"), 1);
    });
}

#[test]
fn one_to_one_cascade_from_another_context_follows_the_original_insert() {
    with_catalog_file(|store| {
        let context = store.context();
        context
            .insert(
                Record::new("Car")
                    .set("model", "direct")
                    .one("engine", Record::new("Engine").set("serial", "e1")),
            )
            .unwrap();
        context
            .insert(
                Record::new("Engine")
                    .set("serial", "e2")
                    .one("car", Record::new("Car").set("model", "deep")),
            )
            .unwrap();
        context.save().unwrap();

        let other = store.context();
        let car = |model: &str| {
            other
                .fetch(&FetchDescriptor::new("Car").filter(Predicate::eq("model", model)))
                .unwrap()[0]
        };
        let direct = car("direct");
        let engine = other.related_one(&direct, "engine").unwrap().unwrap();
        assert_eq!(other.related_one(&engine, "car").unwrap(), Some(direct));

        // the car was inserted directly, so its engine survives
        other.delete(&direct);
        other.save().unwrap();
        assert_eq!(count(&other, "Car"), 1);
        assert_eq!(count(&other, "Engine"), 2);

        // the car reached through its engine's insert cascades
        let deep = car("deep");
        other.delete(&deep);
        other.save().unwrap();
        assert_eq!(count(&other, "Car"), 0);
        assert_eq!(count(&store.context(), "Engine"), 1);
    });
}

#[test]
fn cascade_many_to_many_regardless_of_origin() {
    with_catalog(|store| {
        let context = store.context();
        let playlist = context
            .insert(Record::new("Playlist").set("name", "mix").many(
                "songs",
                [
                    Record::new("Song").set("title", "a"),
                    Record::new("Song").set("title", "b"),
                ],
            ))
            .unwrap();
        context.save().unwrap();

        context.delete(&playlist);
        context.save().unwrap();
        assert_eq!(count(&store.context(), "Song"), 0);
    });
}

#[test]
fn nullify_clears_back_references() {
    with_catalog(|store| {
        let context = store.context();
        let department = context
            .insert(Record::new("Department").set("name", "ops").many(
                "employees",
                [
                    Record::new("Employee").set("name", "a"),
                    Record::new("Employee").set("name", "b"),
                ],
            ))
            .unwrap();
        let employees = context.related_many(&department, "employees").unwrap();
        context.save().unwrap();

        context.delete(&department);
        let summary = context.save().unwrap();

        assert_eq!(summary.nullified, 2);
        assert_eq!(count(&context, "Employee"), 2);
        for employee in &employees {
            assert_eq!(context.related_one(employee, "department").unwrap(), None);
        }
        let fresh = store.context();
        for employee in fresh.fetch_all("Employee").unwrap() {
            assert_eq!(fresh.related_one(&employee, "department").unwrap(), None);
        }
    });
}

#[test]
fn deny_blocks_until_members_are_deleted() {
    with_catalog(|store| {
        let context = store.context();
        let account = context
            .insert(
                Record::new("Account")
                    .set("name", "cash")
                    .many("postings", [Record::new("Posting").set("amount", 10)]),
            )
            .unwrap();
        let posting = context.related_many(&account, "postings").unwrap()[0];
        context.save().unwrap();

        context.delete(&account);
        let err = context.save().unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(context.has_changes());
        assert_eq!(count(&store.context(), "Account"), 1);

        context.delete(&posting);
        let summary = context.save().unwrap();
        assert_eq!(summary.deleted, 2);
        assert_eq!(count(&store.context(), "Account"), 0);
        assert_eq!(count(&store.context(), "Posting"), 0);

        // already gone
        context.delete(&account);
        assert!(!context.has_changes());
    });
}

#[test]
fn deny_allows_delete_once_members_are_unlinked() {
    with_catalog(|store| {
        let context = store.context();
        let account = context
            .insert(
                Record::new("Account")
                    .set("name", "cash")
                    .many("postings", [Record::new("Posting").set("amount", 10)]),
            )
            .unwrap();
        let posting = context.related_many(&account, "postings").unwrap()[0];
        context.save().unwrap();

        context.unlink(&account, "postings", &posting).unwrap();
        context.delete(&account);
        context.save().unwrap();

        assert_eq!(count(&context, "Posting"), 1);
        assert_eq!(context.related_one(&posting, "account").unwrap(), None);
    });
}

#[test]
fn no_action_leaves_a_dangling_reference() {
    with_catalog(|store| {
        let context = store.context();
        let owner = context
            .insert(
                Record::new("Owner")
                    .set("name", "o")
                    .many("pets", [Record::new("Pet").set("name", "rex")]),
            )
            .unwrap();
        let pet = context.related_many(&owner, "pets").unwrap()[0];
        context.save().unwrap();

        context.delete(&owner);
        context.save().unwrap();

        assert_eq!(count(&context, "Pet"), 1);
        assert!(matches!(
            context.related_one(&pet, "owner"),
            Err(CoreError::DanglingReference { .. })
        ));

        let fresh = store.context();
        let pet = fresh.fetch_all("Pet").unwrap()[0];
        assert!(matches!(
            fresh.related_one(&pet, "owner"),
            Err(CoreError::DanglingReference { .. })
        ));

        // relinking repairs it
        let owner = fresh
            .link(&pet, "owner", Record::new("Owner").set("name", "new"))
            .unwrap();
        assert_eq!(fresh.related_one(&pet, "owner").unwrap(), Some(owner));
    });
}

#[test]
fn no_action_with_manual_nullify() {
    with_catalog(|store| {
        let context = store.context();
        let owner = context
            .insert(
                Record::new("Owner")
                    .set("name", "o")
                    .many("pets", [Record::new("Pet").set("name", "rex")]),
            )
            .unwrap();
        let pet = context.related_many(&owner, "pets").unwrap()[0];
        context.save().unwrap();

        context.clear(&owner, "pets").unwrap();
        context.delete(&owner);
        context.save().unwrap();

        assert_eq!(context.related_one(&pet, "owner").unwrap(), None);
    });
}

#[test]
fn delete_is_idempotent() {
    with_catalog(|store| {
        let once = store.context();
        let twice = store.context();
        for context in [&once, &twice] {
            context
                .insert(Record::new("SimpleItem").set("id", 1).set("name", "a"))
                .unwrap();
            context.save().unwrap();
        }

        let item = once.fetch_all("SimpleItem").unwrap()[0];
        once.delete(&item);
        let first = once.save().unwrap();

        let items = twice.fetch_all("SimpleItem").unwrap();
        let item = items[items.len() - 1];
        twice.delete(&item);
        twice.delete(&item);
        let second = twice.save().unwrap();

        assert_eq!(first.deleted, second.deleted);
        assert_eq!(count(&store.context(), "SimpleItem"), 0);
    });
}

#[test]
fn deleting_unknown_records_is_a_no_op() {
    with_catalog(|store| {
        let context = store.context();
        let other = store.context();
        let foreign = other
            .insert(Record::new("SimpleItem").set("id", 1).set("name", "a"))
            .unwrap();

        context.delete(&foreign);
        assert!(!context.has_changes());
        assert!(other.deleted().is_empty());

        let unsaved = context
            .insert(Record::new("SimpleItem").set("id", 2).set("name", "b"))
            .unwrap();
        context.delete(&unsaved);
        let summary = context.save().unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(count(&store.context(), "SimpleItem"), 0);
    });
}

#[test]
fn delete_where_cascades_from_direct_owners() {
    with_catalog(|store| {
        let context = store.context();
        context
            .insert(
                Record::new("Library")
                    .set("name", "central")
                    .many("books", [Record::new("Book").set("title", "a")]),
            )
            .unwrap();
        context.save().unwrap();

        let deleted = context
            .delete_where(&FetchDescriptor::new("Library").filter(Predicate::eq("name", "central")))
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(count(&store.context(), "Book"), 0);
    });
}

#[test]
fn delete_where_blocked_by_deny_leaves_records_unmarked() {
    with_catalog(|store| {
        let context = store.context();
        context
            .insert(
                Record::new("Account")
                    .set("name", "cash")
                    .many("postings", [Record::new("Posting").set("amount", 1)]),
            )
            .unwrap();
        context.save().unwrap();

        let err = context
            .delete_where(&FetchDescriptor::new("Account"))
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert!(context.deleted().is_empty());
    });
}
