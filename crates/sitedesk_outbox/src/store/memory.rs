//! In-memory journal store.

use super::LogStore;
use crate::error::{OutboxError, OutboxResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A volatile journal store.
///
/// Clones share the same buffer, which lets tests "restart" a session by
/// opening a new queue over a clone of the previous session's store, or
/// tamper with the bytes to simulate torn writes and corruption.
///
/// ```rust
/// use sitedesk_outbox::{LogStore, MemoryLogStore};
///
/// let mut store = MemoryLogStore::new();
/// let offset = store.append(b"record").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(store.size().unwrap(), 6);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStore {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryLogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites the byte at `offset` with `value`. Out-of-range offsets are ignored.
    pub fn poke(&self, offset: usize, value: u8) {
        if let Some(byte) = self.data.write().get_mut(offset) {
            *byte = value;
        }
    }

    /// Appends raw bytes without any framing.
    pub fn push_raw(&self, bytes: &[u8]) {
        self.data.write().extend_from_slice(bytes);
    }
}

impl LogStore for MemoryLogStore {
    fn read_at(&self, offset: u64, len: usize) -> OutboxResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(OutboxError::ReadPastEnd { offset, len, size });
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> OutboxResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn sync(&mut self) -> OutboxResult<()> {
        Ok(())
    }

    fn size(&self) -> OutboxResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> OutboxResult<()> {
        let mut data = self.data.write();
        if new_size > data.len() as u64 {
            return Err(OutboxError::InvalidConfig(format!(
                "cannot truncate journal to {new_size} bytes, current size is {}",
                data.len()
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, image: &[u8]) -> OutboxResult<()> {
        *self.data.write() = image.to_vec();
        Ok(())
    }
}
