//! Inverse relationship maintenance.
//!
//! Every edit goes through [`link`] or [`unlink`]. When the schema resolved
//! an inverse for the edited field, the opposite endpoint is updated in the
//! same call, including detaching whichever record previously held a to-one
//! slot on either side.

use super::arena::Arena;
use crate::error::{CoreError, CoreResult};
use crate::record::RecordKey;
use crate::schema::{Cardinality, Field, Schema};

fn relationship<'s>(
    schema: &'s Schema,
    arena: &Arena,
    owner: RecordKey,
    field: &str,
) -> CoreResult<(String, &'s Field)> {
    let entity = arena
        .get(owner)
        .map(|e| e.entity.clone())
        .ok_or_else(|| CoreError::not_registered(format!("record {}", owner.as_usize())))?;
    let declared = schema.relationship(&entity, field)?;
    Ok((entity, declared))
}

fn cardinality(field: &Field) -> Cardinality {
    field.cardinality().unwrap_or(Cardinality::Many)
}

/// Adds `target` to `owner.field`: sets a to-one field or appends to a
/// to-many field.
pub(crate) fn link(
    schema: &Schema,
    arena: &mut Arena,
    owner: RecordKey,
    field: &str,
    target: RecordKey,
) -> CoreResult<()> {
    let (entity, declared) = relationship(schema, arena, owner, field)?;
    let owner = arena.resolve(owner);
    let target = arena.resolve(target);
    let target_entity = arena
        .get(target)
        .map(|e| e.entity.clone())
        .ok_or_else(|| CoreError::not_registered(format!("record {}", target.as_usize())))?;
    if Some(target_entity.as_str()) != declared.target() {
        return Err(CoreError::type_mismatch(
            &entity,
            field,
            declared.target().unwrap_or_default(),
            target_entity,
        ));
    }
    if arena
        .get(owner)
        .is_some_and(|e| e.related(field).contains(&target))
    {
        return Ok(());
    }

    let inverse = schema.inverse_of(&entity, field).map(str::to_string);
    let replaced = match arena.get_mut(owner) {
        Some(entry) => {
            let replaced = entry.attach(field, target, cardinality(declared));
            entry.touch();
            replaced
        }
        None => None,
    };

    let Some(inverse) = inverse else {
        return Ok(());
    };
    let back = schema.relationship(&target_entity, &inverse)?;

    // the owner's previous to-one partner no longer points back
    if let Some(previous) = replaced {
        if let Some(entry) = arena.get_mut(previous) {
            if entry.detach(&inverse, owner) {
                entry.touch();
            }
        }
    }

    let stolen = match arena.get_mut(target) {
        Some(entry) => {
            let stolen = entry.attach(&inverse, owner, cardinality(back));
            entry.touch();
            stolen
        }
        None => None,
    };

    // the target's previous to-one partner loses the target
    if let Some(previous) = stolen {
        if let Some(entry) = arena.get_mut(previous) {
            if entry.detach(field, target) {
                entry.touch();
            }
        }
    }
    Ok(())
}

/// Removes `target` from `owner.field` and the owner from the inverse.
/// Unlinking records that are not linked does nothing.
pub(crate) fn unlink(
    schema: &Schema,
    arena: &mut Arena,
    owner: RecordKey,
    field: &str,
    target: RecordKey,
) -> CoreResult<()> {
    let (entity, _) = relationship(schema, arena, owner, field)?;
    let owner = arena.resolve(owner);
    let target = arena.resolve(target);

    if let Some(entry) = arena.get_mut(owner) {
        if entry.detach(field, target) {
            entry.touch();
        }
    }
    if let Some(inverse) = schema.inverse_of(&entity, field) {
        if let Some(entry) = arena.get_mut(target) {
            if entry.detach(inverse, owner) {
                entry.touch();
            }
        }
    }
    Ok(())
}

/// Empties `owner.field`, inverse sides included.
pub(crate) fn clear(
    schema: &Schema,
    arena: &mut Arena,
    owner: RecordKey,
    field: &str,
) -> CoreResult<()> {
    relationship(schema, arena, owner, field)?;
    let targets = arena
        .get(owner)
        .map(|e| e.related(field).to_vec())
        .unwrap_or_default();
    for target in targets {
        unlink(schema, arena, owner, field, target)?;
    }
    if let Some(entry) = arena.get_mut(owner) {
        if entry.dangling.remove(field).is_some() {
            entry.touch();
        }
    }
    Ok(())
}
