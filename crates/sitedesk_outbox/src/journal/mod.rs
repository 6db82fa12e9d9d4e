//! Durable journal backing the mutation queue.
//!
//! Every queue state change is appended as one framed record before the
//! in-memory queue is updated. On open, the journal is replayed to rebuild
//! the queue and the dead-letter set before any new write is accepted.
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! ## Recovery Policy
//!
//! Tolerated (treated as a clean end of log and trimmed):
//!
//! - a truncated header or payload at the tail, left by a crash mid-append,
//!   provided no complete record follows it
//!
//! Corruption (reported as [`OutboxError::QueueCorruption`] or
//! [`OutboxError::ChecksumMismatch`]):
//!
//! - CRC mismatch, bad magic, unknown record type, future version,
//!   a length above [`MAX_PAYLOAD_SIZE`] or one that overlaps a later
//!   record, or a payload that does not decode
//!
//! What happens on corruption is decided by [`CorruptionPolicy`].

mod record;

pub use record::{
    compute_crc32, JournalRecord, RecordType, JOURNAL_MAGIC, JOURNAL_VERSION, MAX_PAYLOAD_SIZE,
};

use crate::error::{OutboxError, OutboxResult};
use crate::store::LogStore;
use record::{CRC_SIZE, HEADER_SIZE};

/// What to do when replay finds a corrupt record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorruptionPolicy {
    /// Refuse to open; the operator must inspect the journal.
    #[default]
    Fail,
    /// Keep every record before the corrupt one and cut the journal there.
    TruncateAtCorruption,
}

/// Result of reading a journal front to back.
#[derive(Debug)]
pub struct JournalScan {
    /// Valid records with their offsets, in append order.
    pub records: Vec<(u64, JournalRecord)>,
    /// Length of the valid prefix in bytes.
    pub valid_len: u64,
    /// Total journal length in bytes.
    pub total_len: u64,
    /// The corruption that stopped the scan, if any.
    pub corruption: Option<OutboxError>,
}

impl JournalScan {
    /// Returns true if the scan stopped at a partially written tail record.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.corruption.is_none() && self.valid_len < self.total_len
    }
}

/// Append-only record log over a [`LogStore`].
pub struct Journal {
    store: Box<dyn LogStore>,
    sync_on_write: bool,
}

impl Journal {
    /// Wraps a store. Records are synced after every append.
    pub fn new(store: impl LogStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            sync_on_write: true,
        }
    }

    /// Wraps an already boxed store.
    pub fn from_boxed(store: Box<dyn LogStore>) -> Self {
        Self {
            store,
            sync_on_write: true,
        }
    }

    /// Sets whether each append is followed by a sync.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Appends a record and returns its offset.
    pub fn append(&mut self, record: &JournalRecord) -> OutboxResult<u64> {
        let frame = record.encode_frame()?;
        let offset = self.store.append(&frame)?;
        if self.sync_on_write {
            self.store.sync()?;
        }
        Ok(offset)
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> OutboxResult<u64> {
        self.store.size()
    }

    /// Reads every record, stopping at the first torn or corrupt one.
    ///
    /// Corruption is reported inside the returned [`JournalScan`] rather
    /// than as an error, so callers can show how far the journal is intact.
    pub fn scan(&self) -> OutboxResult<JournalScan> {
        let total_len = self.store.size()?;
        let bytes = self.store.read_at(0, total_len as usize)?;

        let mut records = Vec::new();
        let mut pos = 0usize;
        let mut corruption = None;

        while pos < bytes.len() {
            match read_frame(&bytes[pos..], pos as u64) {
                Ok(Some((record, frame_len))) => {
                    records.push((pos as u64, record));
                    pos += frame_len;
                }
                Ok(None) => break,
                Err(e) => {
                    corruption = Some(e);
                    break;
                }
            }
        }

        Ok(JournalScan {
            records,
            valid_len: pos as u64,
            total_len,
            corruption,
        })
    }

    /// Replays the journal, trimming a torn tail and applying `policy` to corruption.
    pub fn recover(&mut self, policy: CorruptionPolicy) -> OutboxResult<Vec<JournalRecord>> {
        let scan = self.scan()?;

        if let Some(err) = scan.corruption {
            match policy {
                CorruptionPolicy::Fail => return Err(err),
                CorruptionPolicy::TruncateAtCorruption => {
                    tracing::warn!(
                        error = %err,
                        kept_records = scan.records.len(),
                        dropped_bytes = scan.total_len - scan.valid_len,
                        "journal corrupt, truncating at last good record"
                    );
                    self.store.truncate(scan.valid_len)?;
                }
            }
        } else if scan.valid_len < scan.total_len {
            tracing::warn!(
                dropped_bytes = scan.total_len - scan.valid_len,
                "discarding partially written journal tail"
            );
            self.store.truncate(scan.valid_len)?;
        }

        Ok(scan.records.into_iter().map(|(_, record)| record).collect())
    }

    /// Replaces the journal contents with `records`.
    ///
    /// Used by compaction. The swap is atomic: if it fails, the journal
    /// still holds its previous records and accepts appends.
    pub fn rewrite(&mut self, records: &[JournalRecord]) -> OutboxResult<()> {
        let mut image = Vec::new();
        for record in records {
            image.extend_from_slice(&record.encode_frame()?);
        }
        self.store.replace(&image)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

/// Parses one frame at the start of `buf`, which runs to the end of the journal.
///
/// Returns `Ok(None)` when `buf` holds only part of a frame. A frame that
/// claims to run past the end is only a torn tail if no complete record
/// follows its header; otherwise its length field is corrupt.
fn read_frame(buf: &[u8], offset: u64) -> OutboxResult<Option<(JournalRecord, usize)>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    if buf[0..4] != JOURNAL_MAGIC {
        return Err(OutboxError::corruption(offset, "invalid magic"));
    }

    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version > JOURNAL_VERSION {
        return Err(OutboxError::corruption(
            offset,
            format!("unsupported version {version}"),
        ));
    }

    let type_byte = buf[6];
    let record_type = RecordType::from_byte(type_byte).ok_or_else(|| {
        OutboxError::corruption(offset, format!("unknown record type {type_byte}"))
    })?;

    let payload_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(OutboxError::corruption(
            offset,
            format!("invalid length {payload_len}"),
        ));
    }
    let total_len = HEADER_SIZE + payload_len + CRC_SIZE;
    if buf.len() < total_len {
        if let Some(next) = find_complete_frame(&buf[HEADER_SIZE..]) {
            return Err(OutboxError::corruption(
                offset,
                format!(
                    "invalid length {payload_len}, a complete record starts {} bytes later",
                    HEADER_SIZE + next
                ),
            ));
        }
        return Ok(None);
    }

    let payload_end = HEADER_SIZE + payload_len;
    let stored_crc = u32::from_le_bytes([
        buf[payload_end],
        buf[payload_end + 1],
        buf[payload_end + 2],
        buf[payload_end + 3],
    ]);
    let computed_crc = compute_crc32(&buf[..payload_end]);
    if stored_crc != computed_crc {
        return Err(OutboxError::ChecksumMismatch {
            offset,
            expected: stored_crc,
            actual: computed_crc,
        });
    }

    let record = JournalRecord::decode_payload(record_type, &buf[HEADER_SIZE..payload_end])
        .map_err(|e| OutboxError::corruption(offset, e.to_string()))?;

    Ok(Some((record, total_len)))
}

/// Returns the position of the first complete, checksummed frame in `buf`.
fn find_complete_frame(buf: &[u8]) -> Option<usize> {
    buf.windows(JOURNAL_MAGIC.len())
        .enumerate()
        .filter(|(_, window)| *window == JOURNAL_MAGIC)
        .map(|(pos, _)| pos)
        .find(|&pos| is_complete_frame(&buf[pos..]))
}

/// Returns true if `buf` starts with a whole frame whose checksum holds.
fn is_complete_frame(buf: &[u8]) -> bool {
    let Some(header) = buf.get(..HEADER_SIZE) else {
        return false;
    };
    let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
    if payload_len > MAX_PAYLOAD_SIZE {
        return false;
    }
    let payload_end = HEADER_SIZE + payload_len;
    match buf.get(payload_end..payload_end + CRC_SIZE) {
        Some(crc) => {
            u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]) == compute_crc32(&buf[..payload_end])
        }
        None => false,
    }
}
