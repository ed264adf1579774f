//! # Relata Core
//!
//! An embedded object-persistence engine built around a unit of work.
//!
//! This crate provides:
//! - An entity graph model with registration-time inverse resolution
//! - [`ModelContext`], an in-memory unit of work with merged-view fetch
//! - Two-phase persistent identifiers (provisional, then durable)
//! - Inverse relationship maintenance for every cardinality
//! - Delete rules: cascade, nullify, deny and no-action
//! - [`Store`], a journaled gateway that commits changesets atomically
//!
//! ## Example
//!
//! ```rust
//! use relata_core::{
//!     DeleteRule, EntityType, FetchDescriptor, Field, ModelContext, Record, ScalarType, Schema,
//!     Store, StoreConfiguration,
//! };
//! use std::sync::Arc;
//!
//! let schema = Schema::builder()
//!     .entity(
//!         EntityType::new("Author")
//!             .field(Field::attribute("name", ScalarType::String).unique())
//!             .field(
//!                 Field::to_many("books", "Book")
//!                     .inverse("author")
//!                     .delete_rule(DeleteRule::Cascade),
//!             ),
//!     )
//!     .entity(
//!         EntityType::new("Book")
//!             .field(Field::attribute("title", ScalarType::String))
//!             .field(Field::to_one("author", "Author")),
//!     )
//!     .build()
//!     .unwrap();
//! let store = Arc::new(Store::open(StoreConfiguration::in_memory(), Arc::new(schema)).unwrap());
//!
//! let context = ModelContext::new(store.clone());
//! let book = context
//!     .insert(
//!         Record::new("Book")
//!             .set("title", "Dune")
//!             .one("author", Record::new("Author").set("name", "Herbert")),
//!     )
//!     .unwrap();
//! let author = context.related_one(&book, "author").unwrap().unwrap();
//! assert_eq!(context.related_many(&author, "books").unwrap(), vec![book]);
//! context.save().unwrap();
//!
//! let reader = ModelContext::new(store);
//! assert_eq!(reader.count(&FetchDescriptor::new("Book")).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod gateway;
mod graph;
mod identity;
mod query;
mod record;
mod schema;
mod types;

pub use config::{ContextOptions, StorageMode, StoreConfiguration};
pub use context::{CooperativeExecutor, Executor, ModelContext, SaveSummary, Task};
pub use error::{CoreError, CoreResult};
pub use gateway::{
    Changeset, CommitReceipt, PendingRow, PersistenceGateway, RowDelete, RowTarget, RowView,
    RowWrite, Store, StoredRow,
};
pub use identity::{IdentityKind, IdentityRegistry, PersistentId};
pub use query::{compare_by, FetchDescriptor, FieldSource, Predicate, SortDescriptor, SortOrder};
pub use record::{Link, Record, RecordKey, RecordRef};
pub use schema::{
    Cardinality, DeleteRule, EntityType, Field, FieldKind, InverseResolution, ScalarType, Schema,
    SchemaBuilder, SchemaError, ValueType,
};
pub use types::{ContextId, RowId, SequenceNumber, StoreId};

pub use relata_codec::Value;
