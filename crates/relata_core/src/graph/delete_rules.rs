//! Delete-rule enforcement.
//!
//! Planning is pure: it reads the arena, computes the full set of records a
//! save will delete and the back-references it must clear, and fails before
//! anything is touched when a deny rule still has members.
//!
//! Cascade follows through a relationship only when the deleted owner was
//! not passed to `insert` directly (it was deep-inserted, fetched, or
//! deleted by predicate), or when the relationship is many-to-many. Owners
//! that were inserted directly nullify instead. A fetched owner whose row
//! was first saved by a direct insert still nullifies its one-to-one
//! relationships; its to-many ones cascade.

use super::arena::{Arena, Entry, EntryState, Origin};
use crate::error::{CoreError, CoreResult};
use crate::record::RecordKey;
use crate::schema::{DeleteRule, Field, Schema};
use std::collections::{BTreeSet, VecDeque};

/// A back-reference to clear: remove `owner` from `member.field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Detach {
    pub(crate) member: RecordKey,
    pub(crate) field: String,
    pub(crate) owner: RecordKey,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DeletePlan {
    /// Every record the save removes, explicit deletes first.
    pub(crate) deletions: Vec<RecordKey>,
    /// How many of those were reached by cascade.
    pub(crate) cascaded: usize,
    pub(crate) nullify: Vec<Detach>,
}

impl DeletePlan {
    pub(crate) fn is_empty(&self) -> bool {
        self.deletions.is_empty()
    }
}

fn cascades(schema: &Schema, owner: &Entry, field: &Field) -> bool {
    if owner.bulk_delete || schema.is_many_to_many(&owner.entity, field.name()) {
        return true;
    }
    match owner.origin {
        Origin::Direct => false,
        Origin::DeepInsert => true,
        Origin::Fetched => {
            !(owner.inserted_directly && schema.is_one_to_one(&owner.entity, field.name()))
        }
    }
}

fn effective_rule(schema: &Schema, owner: &Entry, field: &Field) -> DeleteRule {
    match field.rule() {
        DeleteRule::Cascade if !cascades(schema, owner, field) => DeleteRule::Nullify,
        rule => rule,
    }
}

/// Live members of `owner.field`.
fn members<'a>(arena: &'a Arena, owner: &'a Entry, field: &str) -> impl Iterator<Item = RecordKey> + 'a {
    owner
        .related(field)
        .iter()
        .map(|key| arena.resolve(*key))
        .filter(|key| arena.is_live(*key))
}

/// Computes what saving the pending deletes implies.
///
/// # Errors
///
/// Returns [`CoreError::ConstraintViolation`] when a deny relationship of a
/// record being deleted has a member that is not itself being deleted.
pub(crate) fn plan(schema: &Schema, arena: &Arena) -> CoreResult<DeletePlan> {
    let mut plan = DeletePlan::default();
    let mut doomed: BTreeSet<RecordKey> = BTreeSet::new();
    let mut queue: VecDeque<RecordKey> = VecDeque::new();

    for (key, entry) in arena.live() {
        if entry.state == EntryState::PendingDelete {
            doomed.insert(key);
            plan.deletions.push(key);
            queue.push_back(key);
        }
    }

    while let Some(key) = queue.pop_front() {
        let Some(owner) = arena.get(key) else {
            continue;
        };
        let entity = schema.entity(&owner.entity)?;
        for field in entity.relationships() {
            if effective_rule(schema, owner, field) != DeleteRule::Cascade {
                continue;
            }
            for member in members(arena, owner, field.name()) {
                if doomed.insert(member) {
                    plan.deletions.push(member);
                    plan.cascaded += 1;
                    queue.push_back(member);
                }
            }
        }
    }

    for &key in &plan.deletions {
        let Some(owner) = arena.get(key) else {
            continue;
        };
        let entity = schema.entity(&owner.entity)?;
        for field in entity.relationships() {
            let rule = effective_rule(schema, owner, field);
            let survivors: Vec<RecordKey> = members(arena, owner, field.name())
                .filter(|member| !doomed.contains(member))
                .collect();
            match rule {
                DeleteRule::Deny if !survivors.is_empty() => {
                    return Err(CoreError::constraint_violation(format!(
                        "cannot delete {} while {}.{} has {} member(s)",
                        owner.entity,
                        owner.entity,
                        field.name(),
                        survivors.len()
                    )));
                }
                DeleteRule::Cascade | DeleteRule::NoAction => {}
                DeleteRule::Nullify | DeleteRule::Deny => {
                    let Some(inverse) = schema.inverse_of(&owner.entity, field.name()) else {
                        continue;
                    };
                    for member in survivors {
                        plan.nullify.push(Detach {
                            member,
                            field: inverse.to_string(),
                            owner: key,
                        });
                    }
                }
            }
        }
    }

    Ok(plan)
}

/// Clears the back-references a plan calls for. Returns how many were cleared.
pub(crate) fn apply(plan: &DeletePlan, arena: &mut Arena) -> usize {
    let mut cleared = 0;
    for detach in &plan.nullify {
        if let Some(member) = arena.get_mut(detach.member) {
            if member.detach(&detach.field, detach.owner) {
                member.touch();
                cleared += 1;
            }
        }
    }
    cleared
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::propagator::link;
    use crate::schema::{EntityType, Field};

    fn schema() -> Schema {
        Schema::builder()
            .entity(
                EntityType::new("Parent")
                    .field(
                        Field::to_many("children", "Child")
                            .inverse("parent")
                            .delete_rule(DeleteRule::Cascade),
                    )
                    .field(
                        Field::to_many("guarded", "Guard")
                            .inverse("parent")
                            .delete_rule(DeleteRule::Deny),
                    )
                    .field(
                        Field::to_one("loose", "Loose")
                            .inverse("parent")
                            .delete_rule(DeleteRule::NoAction),
                    )
                    .field(
                        Field::to_one("heir", "Heir")
                            .inverse("parent")
                            .delete_rule(DeleteRule::Cascade),
                    )
                    .field(
                        Field::to_many("tags", "Tag")
                            .inverse("parents")
                            .delete_rule(DeleteRule::Cascade),
                    ),
            )
            .entity(EntityType::new("Child").field(Field::to_one("parent", "Parent")))
            .entity(EntityType::new("Guard").field(Field::to_one("parent", "Parent")))
            .entity(EntityType::new("Loose").field(Field::to_one("parent", "Parent")))
            .entity(EntityType::new("Heir").field(Field::to_one("parent", "Parent")))
            .entity(EntityType::new("Tag").field(Field::to_many("parents", "Parent")))
            .build()
            .unwrap()
    }

    fn add(arena: &mut Arena, entity: &str, origin: Origin) -> RecordKey {
        let mut entry = Entry::new(entity, origin);
        entry.state = EntryState::Committed;
        arena.push(entry)
    }

    fn mark(arena: &mut Arena, key: RecordKey) {
        arena.get_mut(key).unwrap().state = EntryState::PendingDelete;
    }

    #[test]
    fn cascade_from_deep_inserted_owner() {
        let schema = schema();
        let mut arena = Arena::default();
        let parent = add(&mut arena, "Parent", Origin::DeepInsert);
        let a = add(&mut arena, "Child", Origin::Direct);
        let b = add(&mut arena, "Child", Origin::Direct);
        link(&schema, &mut arena, parent, "children", a).unwrap();
        link(&schema, &mut arena, parent, "children", b).unwrap();
        mark(&mut arena, parent);

        let plan = plan(&schema, &arena).unwrap();
        assert_eq!(plan.deletions, vec![parent, a, b]);
        assert_eq!(plan.cascaded, 2);
        assert!(plan.nullify.is_empty());
    }

    #[test]
    fn directly_inserted_owner_nullifies_instead_of_cascading() {
        let schema = schema();
        let mut arena = Arena::default();
        let parent = add(&mut arena, "Parent", Origin::Direct);
        let child = add(&mut arena, "Child", Origin::DeepInsert);
        link(&schema, &mut arena, parent, "children", child).unwrap();
        mark(&mut arena, parent);

        let plan = plan(&schema, &arena).unwrap();
        assert_eq!(plan.deletions, vec![parent]);
        assert_eq!(plan.cascaded, 0);
        assert_eq!(
            plan.nullify,
            vec![Detach {
                member: child,
                field: "parent".into(),
                owner: parent
            }]
        );

        apply(&plan, &mut arena);
        assert!(arena.get(child).unwrap().related("parent").is_empty());
    }

    #[test]
    fn bulk_delete_cascades_from_direct_owner() {
        let schema = schema();
        let mut arena = Arena::default();
        let parent = add(&mut arena, "Parent", Origin::Direct);
        let child = add(&mut arena, "Child", Origin::DeepInsert);
        link(&schema, &mut arena, parent, "children", child).unwrap();
        mark(&mut arena, parent);
        arena.get_mut(parent).unwrap().bulk_delete = true;

        assert_eq!(plan(&schema, &arena).unwrap().deletions, vec![parent, child]);
    }

    #[test]
    fn many_to_many_cascades_regardless_of_origin() {
        let schema = schema();
        let mut arena = Arena::default();
        let parent = add(&mut arena, "Parent", Origin::Direct);
        let tag = add(&mut arena, "Tag", Origin::DeepInsert);
        link(&schema, &mut arena, parent, "tags", tag).unwrap();
        mark(&mut arena, parent);

        assert_eq!(plan(&schema, &arena).unwrap().cascaded, 1);
    }

    #[test]
    fn deny_blocks_until_members_are_deleted_too() {
        let schema = schema();
        let mut arena = Arena::default();
        let parent = add(&mut arena, "Parent", Origin::Direct);
        let guard = add(&mut arena, "Guard", Origin::DeepInsert);
        link(&schema, &mut arena, parent, "guarded", guard).unwrap();
        mark(&mut arena, parent);

        let err = plan(&schema, &arena).unwrap_err();
        assert!(err.is_constraint_violation());

        mark(&mut arena, guard);
        let plan = plan(&schema, &arena).unwrap();
        assert_eq!(plan.deletions.len(), 2);
    }

    #[test]
    fn no_action_leaves_back_reference() {
        let schema = schema();
        let mut arena = Arena::default();
        let parent = add(&mut arena, "Parent", Origin::Direct);
        let loose = add(&mut arena, "Loose", Origin::DeepInsert);
        link(&schema, &mut arena, parent, "loose", loose).unwrap();
        mark(&mut arena, parent);

        let plan = plan(&schema, &arena).unwrap();
        assert_eq!(plan.deletions, vec![parent]);
        assert!(plan.nullify.is_empty());
        assert_eq!(arena.get(loose).unwrap().related("parent"), &[parent]);
    }

    #[test]
    fn deleting_a_dependent_clears_its_owner_side() {
        let schema = schema();
        let mut arena = Arena::default();
        let parent = add(&mut arena, "Parent", Origin::Direct);
        let guard = add(&mut arena, "Guard", Origin::DeepInsert);
        link(&schema, &mut arena, parent, "guarded", guard).unwrap();
        mark(&mut arena, guard);

        let plan = plan(&schema, &arena).unwrap();
        apply(&plan, &mut arena);
        assert!(arena.get(parent).unwrap().related("guarded").is_empty());
        assert_eq!(arena.get(parent).unwrap().state, EntryState::PendingUpdate);
    }

    #[test]
    fn fetched_owner_follows_how_its_row_was_registered() {
        let schema = schema();
        for inserted_directly in [false, true] {
            let mut arena = Arena::default();
            let parent = add(&mut arena, "Parent", Origin::Fetched);
            arena.get_mut(parent).unwrap().inserted_directly = inserted_directly;
            let heir = add(&mut arena, "Heir", Origin::Fetched);
            let child = add(&mut arena, "Child", Origin::Fetched);
            link(&schema, &mut arena, parent, "heir", heir).unwrap();
            link(&schema, &mut arena, parent, "children", child).unwrap();
            mark(&mut arena, parent);

            let plan = plan(&schema, &arena).unwrap();
            // to-many always cascades from a fetched owner
            assert!(plan.deletions.contains(&child));
            assert_eq!(plan.deletions.contains(&heir), !inserted_directly);
        }
    }

    #[test]
    fn nothing_pending_plans_nothing() {
        let schema = schema();
        let mut arena = Arena::default();
        add(&mut arena, "Parent", Origin::Direct);
        assert!(plan(&schema, &arena).unwrap().is_empty());
    }
}
