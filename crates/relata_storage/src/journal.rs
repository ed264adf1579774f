//! Checksummed frame journal.
//!
//! Every committed changeset is appended as one frame:
//!
//! ```text
//! | magic (4) | payload len (u32 LE) | payload | crc32 of payload (u32 LE) |
//! ```
//!
//! Recovery reads frames front to back. A frame cut short by a crash is a
//! clean end of log and is truncated away; a complete frame whose magic or
//! checksum does not match is corruption and fails the recovery.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use tracing::warn;

/// Marker at the start of every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"RLJ1";

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = 4 + 4 + 4;

const HEADER_LEN: usize = 8;
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Result of replaying a journal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Payloads of every intact frame, oldest first.
    pub frames: Vec<Vec<u8>>,
    /// Bytes of a torn trailing frame that were cut off.
    pub discarded_bytes: u64,
}

/// An append-only log of framed payloads over a [`StorageBackend`].
#[derive(Debug)]
pub struct Journal<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> Journal<B> {
    /// Wraps a backend. Call [`Journal::recover`] before appending to a
    /// backend that may hold a previous run's frames.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Appends one frame and returns its offset. The frame is not durable
    /// until [`Journal::commit`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FrameTooLarge`] for oversized payloads, or the
    /// backend's error.
    pub fn append(&mut self, payload: &[u8]) -> StorageResult<u64> {
        if payload.len() > MAX_PAYLOAD {
            return Err(StorageError::FrameTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let mut frame = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
        frame.extend_from_slice(&FRAME_MAGIC);
        // MAX_PAYLOAD fits in u32
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        self.backend.append(&frame)
    }

    /// Flushes appended frames, and syncs them to disk when `sync` is set.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn commit(&mut self, sync: bool) -> StorageResult<()> {
        self.backend.flush()?;
        if sync {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Drops every byte from `offset` on, undoing appends whose commit
    /// failed. `offset` is what [`Journal::append`] returned for the first
    /// frame to drop.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn discard_from(&mut self, offset: u64) -> StorageResult<()> {
        self.backend.truncate(offset)
    }

    /// Reads back every intact frame and cuts off a torn tail.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] when a complete frame fails its
    /// magic or checksum test, or the backend's error.
    pub fn recover(&mut self) -> StorageResult<Recovery> {
        let bytes = self.backend.read_all()?;
        let mut frames = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let rest = &bytes[offset..];
            if rest.len() < HEADER_LEN {
                break;
            }
            if rest[..4] != FRAME_MAGIC {
                return Err(StorageError::corrupted(offset as u64, "bad frame magic"));
            }

            let len = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
            if len > MAX_PAYLOAD {
                return Err(StorageError::corrupted(
                    offset as u64,
                    format!("frame length {len} exceeds limit"),
                ));
            }
            if rest.len() < HEADER_LEN + len + 4 {
                break;
            }

            let payload = &rest[HEADER_LEN..HEADER_LEN + len];
            let crc_at = HEADER_LEN + len;
            let stored = u32::from_le_bytes([
                rest[crc_at],
                rest[crc_at + 1],
                rest[crc_at + 2],
                rest[crc_at + 3],
            ]);
            let computed = crc32fast::hash(payload);
            if stored != computed {
                return Err(StorageError::corrupted(
                    offset as u64,
                    format!("checksum mismatch: stored {stored:08x}, computed {computed:08x}"),
                ));
            }

            frames.push(payload.to_vec());
            offset += HEADER_LEN + len + 4;
        }

        let discarded_bytes = (bytes.len() - offset) as u64;
        if discarded_bytes > 0 {
            warn!(
                offset,
                discarded_bytes, "dropping torn frame at end of journal"
            );
            self.backend.truncate(offset as u64)?;
        }

        Ok(Recovery {
            frames,
            discarded_bytes,
        })
    }

    /// Discards every frame.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn reset(&mut self) -> StorageResult<()> {
        self.backend.truncate(0)
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn len(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Returns whether the journal holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.backend.size()? == 0)
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}
