//! # Relata Testkit
//!
//! Test utilities for Relata.
//!
//! This crate provides:
//! - Store fixtures over memory and temporary files, with reopen
//! - A catalog of model schemas covering every relationship shape and
//!   delete rule
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use relata_testkit::prelude::*;
//!
//! let store = TestStore::memory(models::catalog());
//! let context = store.context();
//! context
//!     .insert(Record::new("SimpleItem").set("id", 1).set("name", "one"))
//!     .unwrap();
//! context.save().unwrap();
//! assert_eq!(store.context().count_all("SimpleItem").unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod models;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::models;
    pub use relata_core::{
        CoreError, CoreResult, DeleteRule, FetchDescriptor, ModelContext, Predicate, Record,
        RecordRef, SortDescriptor, Value,
    };
}

pub use fixtures::*;
pub use generators::*;
