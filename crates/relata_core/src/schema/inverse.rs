//! Inverse resolution pass.
//!
//! Runs once when a schema is built. Each relationship ends up with an
//! explicit inverse, an inferred one, or a definite "no inverse" marker;
//! contexts never guess at runtime.

use super::field::{Cardinality, Field};
use super::{EntityType, SchemaError};
use std::collections::{BTreeMap, HashMap, HashSet};

/// How the inverse of a relationship was determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InverseResolution {
    /// Declared with [`Field::inverse`] on either side.
    Explicit(String),
    /// The only relationship on the target that points back, and vice versa.
    Inferred(String),
    /// No inverse; the two sides evolve independently.
    None,
}

impl InverseResolution {
    /// The inverse field name, if any.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            InverseResolution::Explicit(f) | InverseResolution::Inferred(f) => Some(f),
            InverseResolution::None => None,
        }
    }
}

type FieldKey = (String, String);

pub(super) fn resolve(
    entities: &BTreeMap<String, EntityType>,
) -> Result<HashMap<FieldKey, InverseResolution>, SchemaError> {
    let mut explicit: HashMap<FieldKey, String> = HashMap::new();

    for entity in entities.values() {
        for field in entity.relationships() {
            let Some(inverse) = field.declared_inverse() else {
                continue;
            };
            let target = target_of(entities, entity, field)?;
            let back = target.get(inverse).ok_or_else(|| SchemaError::UnknownInverse {
                entity: entity.name().to_string(),
                field: field.name().to_string(),
                inverse: format!("{}.{inverse}", target.name()),
            })?;

            if back.target() != Some(entity.name()) {
                return Err(SchemaError::inverse_mismatch(
                    entity.name(),
                    field.name(),
                    format!(
                        "{}.{inverse} does not point back to {}",
                        target.name(),
                        entity.name()
                    ),
                ));
            }
            if target.name() == entity.name() && inverse == field.name() {
                return Err(SchemaError::inverse_mismatch(
                    entity.name(),
                    field.name(),
                    "a relationship cannot be its own inverse",
                ));
            }
            if let Some(other) = back.declared_inverse() {
                if other != field.name() {
                    return Err(SchemaError::inverse_mismatch(
                        entity.name(),
                        field.name(),
                        format!("{}.{inverse} declares {other} as its inverse", target.name()),
                    ));
                }
            }

            let forward = (entity.name().to_string(), field.name().to_string());
            let backward = (target.name().to_string(), inverse.to_string());
            for (key, partner) in [(&forward, &backward.1), (&backward, &forward.1)] {
                if let Some(existing) = explicit.get(key) {
                    if existing != partner {
                        return Err(SchemaError::inverse_mismatch(
                            &key.0,
                            &key.1,
                            format!("paired with both {existing} and {partner}"),
                        ));
                    }
                }
            }
            explicit.insert(forward, backward.1.clone());
            explicit.insert(backward, field.name().to_string());
        }
    }

    let paired: HashSet<&FieldKey> = explicit.keys().collect();
    let mut resolved = HashMap::new();

    for entity in entities.values() {
        for field in entity.relationships() {
            let key = (entity.name().to_string(), field.name().to_string());
            if let Some(inverse) = explicit.get(&key) {
                resolved.insert(key, InverseResolution::Explicit(inverse.clone()));
                continue;
            }

            let target = target_of(entities, entity, field)?;
            let candidates = unpaired_back_references(&paired, entity, field, target);
            let resolution = match candidates.as_slice() {
                [only] => {
                    let mutual = unpaired_back_references(&paired, target, only, entity);
                    let both_many = field.cardinality() == Some(Cardinality::Many)
                        && only.cardinality() == Some(Cardinality::Many);
                    if mutual.len() == 1 && mutual[0].name() == field.name() && !both_many {
                        InverseResolution::Inferred(only.name().to_string())
                    } else {
                        InverseResolution::None
                    }
                }
                _ => InverseResolution::None,
            };
            resolved.insert(key, resolution);
        }
    }

    Ok(resolved)
}

fn target_of<'a>(
    entities: &'a BTreeMap<String, EntityType>,
    entity: &EntityType,
    field: &Field,
) -> Result<&'a EntityType, SchemaError> {
    let target = field.target().unwrap_or_default();
    entities
        .get(target)
        .ok_or_else(|| SchemaError::UnknownTarget {
            entity: entity.name().to_string(),
            field: field.name().to_string(),
            target: target.to_string(),
        })
}

/// Relationship fields on `target` that point at `source` and are not part
/// of an explicit pair, excluding `field` itself for self-relationships.
fn unpaired_back_references<'a>(
    paired: &HashSet<&FieldKey>,
    source: &EntityType,
    field: &Field,
    target: &'a EntityType,
) -> Vec<&'a Field> {
    target
        .relationships()
        .filter(|candidate| candidate.target() == Some(source.name()))
        .filter(|candidate| {
            !(target.name() == source.name() && candidate.name() == field.name())
        })
        .filter(|candidate| {
            !paired.contains(&(target.name().to_string(), candidate.name().to_string()))
        })
        .collect()
}
