//! # Relata Storage
//!
//! The byte-level layer underneath a Relata store.
//!
//! Backends are **opaque byte stores**: they append, read back and truncate
//! bytes and never look inside them. On top of a backend, [`Journal`] frames
//! each committed changeset with a length prefix and a CRC32 so a store can
//! be rebuilt by replaying the frames in order.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests
//! - [`FileBackend`] - persistent stores using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use relata_storage::{InMemoryBackend, Journal};
//!
//! let mut journal = Journal::new(InMemoryBackend::new());
//! journal.append(b"first commit").unwrap();
//! journal.append(b"second commit").unwrap();
//!
//! let recovery = journal.recover().unwrap();
//! assert_eq!(recovery.frames.len(), 2);
//! assert_eq!(recovery.frames[1], b"second commit");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod journal;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use journal::{Journal, Recovery, FRAME_MAGIC, FRAME_OVERHEAD};
pub use memory::InMemoryBackend;
