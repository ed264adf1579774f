//! Model catalog.
//!
//! One schema holding a small entity family per scenario. Entity names are
//! distinct across families so inverse inference only ever sees the pair it
//! is meant to see.

use relata_core::{DeleteRule, EntityType, Field, ScalarType, Schema, ValueType};
use std::sync::Arc;

/// `SimpleItem { id, name }`.
pub fn simple_item() -> EntityType {
    EntityType::new("SimpleItem")
        .field(Field::attribute("id", ScalarType::Integer))
        .field(Field::attribute("name", ScalarType::String))
}

/// `UniqueItem { key (unique), value }`.
pub fn unique_item() -> EntityType {
    EntityType::new("UniqueItem")
        .field(Field::attribute("key", ScalarType::String).unique())
        .field(Field::attribute("value", ScalarType::Integer))
}

/// One-to-one with an explicit inverse: `Person.passport <-> Passport.holder`.
pub fn one_to_one_explicit() -> [EntityType; 2] {
    [
        EntityType::new("Person")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_one("passport", "Passport").inverse("holder")),
        EntityType::new("Passport")
            .field(Field::attribute("number", ScalarType::String))
            .field(Field::to_one("holder", "Person")),
    ]
}

/// One-to-one with an inferred inverse: `Husband.wife <-> Wife.husband`.
pub fn one_to_one_inferred() -> [EntityType; 2] {
    [
        EntityType::new("Husband")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_one("wife", "Wife")),
        EntityType::new("Wife")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_one("husband", "Husband")),
    ]
}

/// One-to-many with an explicit inverse: `Parent.children <-> Child.parent`.
pub fn one_to_many_explicit() -> [EntityType; 2] {
    [
        EntityType::new("Parent")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_many("children", "Child").inverse("parent")),
        EntityType::new("Child")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_one("parent", "Parent")),
    ]
}

/// One-to-many with an inferred inverse: `Team.players <-> Player.team`.
pub fn one_to_many_inferred() -> [EntityType; 2] {
    [
        EntityType::new("Team")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_many("players", "Player")),
        EntityType::new("Player")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_one("team", "Team")),
    ]
}

/// Many-to-many with an explicit inverse: `Student.courses <-> Course.students`.
pub fn many_to_many_explicit() -> [EntityType; 2] {
    [
        EntityType::new("Student")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_many("courses", "Course").inverse("students")),
        EntityType::new("Course")
            .field(Field::attribute("title", ScalarType::String))
            .field(Field::to_many("students", "Student")),
    ]
}

/// Many-to-many without an inverse: `Post.tags` and `Tag.posts` evolve
/// independently.
pub fn many_to_many_independent() -> [EntityType; 2] {
    [
        EntityType::new("Post")
            .field(Field::attribute("title", ScalarType::String))
            .field(Field::to_many("tags", "Tag")),
        EntityType::new("Tag")
            .field(Field::attribute("label", ScalarType::String))
            .field(Field::to_many("posts", "Post")),
    ]
}

/// Cascade, one-to-one: `Car.engine -> Engine.car`.
pub fn cascade_one_to_one() -> [EntityType; 2] {
    [
        EntityType::new("Car")
            .field(Field::attribute("model", ScalarType::String))
            .field(
                Field::to_one("engine", "Engine")
                    .inverse("car")
                    .delete_rule(DeleteRule::Cascade),
            ),
        EntityType::new("Engine")
            .field(Field::attribute("serial", ScalarType::String))
            .field(Field::to_one("car", "Car")),
    ]
}

/// Cascade, one-to-many: `Library.books -> Book.library`.
pub fn cascade_one_to_many() -> [EntityType; 2] {
    [
        EntityType::new("Library")
            .field(Field::attribute("name", ScalarType::String))
            .field(
                Field::to_many("books", "Book")
                    .inverse("library")
                    .delete_rule(DeleteRule::Cascade),
            ),
        EntityType::new("Book")
            .field(Field::attribute("title", ScalarType::String))
            .field(Field::to_one("library", "Library")),
    ]
}

/// Cascade, many-to-many: `Playlist.songs -> Song.playlists`.
pub fn cascade_many_to_many() -> [EntityType; 2] {
    [
        EntityType::new("Playlist")
            .field(Field::attribute("name", ScalarType::String))
            .field(
                Field::to_many("songs", "Song")
                    .inverse("playlists")
                    .delete_rule(DeleteRule::Cascade),
            ),
        EntityType::new("Song")
            .field(Field::attribute("title", ScalarType::String))
            .field(Field::to_many("playlists", "Playlist")),
    ]
}

/// Nullify: `Department.employees -> Employee.department`.
pub fn nullify() -> [EntityType; 2] {
    [
        EntityType::new("Department")
            .field(Field::attribute("name", ScalarType::String))
            .field(
                Field::to_many("employees", "Employee")
                    .inverse("department")
                    .delete_rule(DeleteRule::Nullify),
            ),
        EntityType::new("Employee")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_one("department", "Department")),
    ]
}

/// Deny: `Account.postings -> Posting.account`.
pub fn deny() -> [EntityType; 2] {
    [
        EntityType::new("Account")
            .field(Field::attribute("name", ScalarType::String))
            .field(
                Field::to_many("postings", "Posting")
                    .inverse("account")
                    .delete_rule(DeleteRule::Deny),
            ),
        EntityType::new("Posting")
            .field(Field::attribute("amount", ScalarType::Integer))
            .field(Field::to_one("account", "Account")),
    ]
}

/// No action: `Owner.pets -> Pet.owner`. `Pet.owner` is also no-action, so
/// deleting a pet leaves the owner's side alone too.
pub fn no_action() -> [EntityType; 2] {
    [
        EntityType::new("Owner")
            .field(Field::attribute("name", ScalarType::String))
            .field(
                Field::to_many("pets", "Pet")
                    .inverse("owner")
                    .delete_rule(DeleteRule::NoAction),
            ),
        EntityType::new("Pet")
            .field(Field::attribute("name", ScalarType::String))
            .field(Field::to_one("owner", "Owner").delete_rule(DeleteRule::NoAction)),
    ]
}

/// `Session { token, hits (transient, default 0) }`.
pub fn transient() -> EntityType {
    EntityType::new("Session")
        .field(Field::attribute("token", ScalarType::String))
        .field(Field::attribute("hits", ScalarType::Integer).transient(0))
}

/// One attribute of every supported type.
pub fn various_types() -> EntityType {
    EntityType::new("Sample")
        .field(Field::attribute("text", ScalarType::String))
        .field(Field::attribute("count", ScalarType::Integer))
        .field(Field::attribute("ratio", ScalarType::Float))
        .field(Field::attribute("flag", ScalarType::Bool))
        .field(Field::attribute("at", ScalarType::Timestamp))
        .field(Field::attribute("blob", ScalarType::Bytes))
        .field(Field::attribute("uid", ScalarType::Uuid))
        .field(Field::attribute("price", ScalarType::Decimal))
        .field(Field::attribute("labels", ValueType::list(ScalarType::String)))
        .field(Field::attribute("note", ValueType::optional(ScalarType::String)))
}

/// `Place { name, location: { lat, lon } }`.
pub fn composite() -> EntityType {
    EntityType::new("Place")
        .field(Field::attribute("name", ScalarType::String))
        .field(Field::attribute(
            "location",
            ValueType::composite([
                ("lat", ScalarType::Float),
                ("lon", ScalarType::Float),
            ]),
        ))
}

/// `EnumItem`: plain, tagged and generic-instantiated enumerations, lists of
/// them, and an optional plain one.
pub fn enum_item() -> EntityType {
    let plain = ValueType::enumeration(["foo", "bar"]);
    let tagged = ValueType::variant([
        ("foo", vec![ValueType::from(ScalarType::String)]),
        (
            "bar",
            vec![
                ValueType::from(ScalarType::String),
                ValueType::from(ScalarType::Integer),
            ],
        ),
        (
            "baz",
            vec![ValueType::composite([
                ("string", ScalarType::String),
                ("int", ScalarType::Integer),
            ])],
        ),
        ("qux", vec![ValueType::optional(ScalarType::String)]),
    ]);
    let generic = ValueType::variant([
        ("foo", vec![ValueType::from(ScalarType::String)]),
        ("bar", vec![ValueType::from(ScalarType::Integer)]),
    ]);
    EntityType::new("EnumItem")
        .field(Field::attribute("plain", plain.clone()))
        .field(Field::attribute("plains", ValueType::list(plain.clone())))
        .field(Field::attribute("tagged", tagged.clone()))
        .field(Field::attribute("taggeds", ValueType::list(tagged)))
        .field(Field::attribute("generic", generic.clone()))
        .field(Field::attribute("generics", ValueType::list(generic)))
        .field(Field::attribute("optional_plain", ValueType::optional(plain)))
}

/// Every family above in one schema.
///
/// # Panics
///
/// Panics if the catalog fails validation, which is a bug in this module.
pub fn catalog() -> Arc<Schema> {
    let mut builder = Schema::builder()
        .entity(simple_item())
        .entity(unique_item())
        .entity(transient())
        .entity(various_types())
        .entity(composite())
        .entity(enum_item());
    let families = [
        one_to_one_explicit(),
        one_to_one_inferred(),
        one_to_many_explicit(),
        one_to_many_inferred(),
        many_to_many_explicit(),
        many_to_many_independent(),
        cascade_one_to_one(),
        cascade_one_to_many(),
        cascade_many_to_many(),
        nullify(),
        deny(),
        no_action(),
    ];
    for family in families {
        for entity in family {
            builder = builder.entity(entity);
        }
    }
    Arc::new(builder.build().expect("model catalog is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relata_core::InverseResolution;

    #[test]
    fn catalog_resolves_inverses() {
        let schema = catalog();
        assert_eq!(schema.inverse_of("Passport", "holder"), Some("passport"));
        assert_eq!(
            schema.inverse_resolution("Husband", "wife"),
            &InverseResolution::Inferred("husband".into())
        );
        assert_eq!(schema.inverse_of("Team", "players"), Some("team"));
        assert!(schema.is_many_to_many("Student", "courses"));
        assert_eq!(schema.inverse_of("Post", "tags"), None);
    }
}
