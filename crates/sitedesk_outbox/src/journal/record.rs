//! Journal record types and serialization.

use crate::dead_letter::DeadLetter;
use crate::error::{OutboxError, OutboxResult};
use crate::mutation::{MutationId, PendingMutation};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SDMQ";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + type (1) + length (4).
pub(crate) const HEADER_SIZE: usize = 11;

/// Trailing CRC size.
pub(crate) const CRC_SIZE: usize = 4;

/// Largest payload a record may carry.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Type tag of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// A mutation was appended to the queue.
    Enqueued = 1,
    /// A mutation was applied by the server and left the queue.
    Resolved = 2,
    /// A mutation moved from the queue to the dead-letter set.
    DeadLettered = 3,
    /// A dead letter was moved back to the tail of the queue.
    Requeued = 4,
    /// A dead letter was dropped for good.
    Discarded = 5,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Enqueued),
            2 => Some(Self::Resolved),
            3 => Some(Self::DeadLettered),
            4 => Some(Self::Requeued),
            5 => Some(Self::Discarded),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One state change of the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    /// A mutation was appended to the queue.
    Enqueued(PendingMutation),
    /// A mutation was applied and removed.
    Resolved(MutationId),
    /// A mutation was parked in the dead-letter set.
    DeadLettered(DeadLetter),
    /// A dead letter went back to the tail of the queue.
    Requeued(MutationId),
    /// A dead letter was dropped.
    Discarded(MutationId),
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Enqueued(_) => RecordType::Enqueued,
            Self::Resolved(_) => RecordType::Resolved,
            Self::DeadLettered(_) => RecordType::DeadLettered,
            Self::Requeued(_) => RecordType::Requeued,
            Self::Discarded(_) => RecordType::Discarded,
        }
    }

    /// Returns the id of the mutation this record is about.
    #[must_use]
    pub fn mutation_id(&self) -> &MutationId {
        match self {
            Self::Enqueued(m) => m.id(),
            Self::DeadLettered(d) => d.mutation.id(),
            Self::Resolved(id) | Self::Requeued(id) | Self::Discarded(id) => id,
        }
    }

    /// Serializes the record body as CBOR (without envelope).
    pub fn encode_payload(&self) -> OutboxResult<Vec<u8>> {
        match self {
            Self::Enqueued(m) => to_cbor(m),
            Self::DeadLettered(d) => to_cbor(d),
            Self::Resolved(id) | Self::Requeued(id) | Self::Discarded(id) => to_cbor(id),
        }
    }

    /// Deserializes a record from its type and CBOR body.
    pub fn decode_payload(record_type: RecordType, payload: &[u8]) -> OutboxResult<Self> {
        Ok(match record_type {
            RecordType::Enqueued => Self::Enqueued(from_cbor(payload)?),
            RecordType::Resolved => Self::Resolved(from_cbor(payload)?),
            RecordType::DeadLettered => Self::DeadLettered(from_cbor(payload)?),
            RecordType::Requeued => Self::Requeued(from_cbor(payload)?),
            RecordType::Discarded => Self::Discarded(from_cbor(payload)?),
        })
    }

    /// Encodes the full framed record:
    /// `| magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |`.
    pub fn encode_frame(&self) -> OutboxResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(OutboxError::Codec(format!(
                "journal record payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}",
                payload.len()
            )));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| OutboxError::Codec("journal record payload too large".into()))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

fn to_cbor<T: Serialize>(value: &T) -> OutboxResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| OutboxError::Codec(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> OutboxResult<T> {
    ciborium::from_reader(bytes).map_err(|e| OutboxError::Codec(e.to_string()))
}

/// Computes the IEEE CRC32 of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
