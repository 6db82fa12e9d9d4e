//! Byte stores backing the mutation journal.
//!
//! Stores are **opaque append-only byte logs**. They know nothing about
//! journal framing; the [`crate::journal`] module owns the record format.
//!
//! - [`MemoryLogStore`] - volatile, for tests and sessions that opt out of persistence
//! - [`FileLogStore`] - persistent, guarded by an exclusive file lock

mod file;
mod memory;

pub use file::FileLogStore;
pub use memory::MemoryLogStore;

use crate::error::OutboxResult;

/// An append-only byte log.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `sync` returns, all appended bytes survive process termination
/// - `truncate` only shrinks
pub trait LogStore: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> OutboxResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> OutboxResult<u64>;

    /// Forces appended bytes (and file metadata) to durable storage.
    fn sync(&mut self) -> OutboxResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> OutboxResult<u64>;

    /// Discards everything after `new_size`.
    fn truncate(&mut self, new_size: u64) -> OutboxResult<()>;

    /// Atomically replaces the whole contents with `image` and syncs it.
    ///
    /// On error the previous contents are left intact and the store stays
    /// usable.
    fn replace(&mut self, image: &[u8]) -> OutboxResult<()>;
}
