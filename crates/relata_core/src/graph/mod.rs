//! The in-memory record graph of a context.

pub(crate) mod arena;
pub(crate) mod delete_rules;
pub(crate) mod propagator;

pub(crate) use arena::{Arena, Entry, EntryState, Origin, Slot};
