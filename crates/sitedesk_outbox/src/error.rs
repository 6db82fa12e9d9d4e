//! Error types for the outbox.

use crate::mutation::MutationId;
use std::io;
use thiserror::Error;

/// Result type for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors that can occur while queueing or replaying mutations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The request never produced a response (connection refused, reset, DNS).
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the replay can be retried.
        retryable: bool,
    },

    /// The per-attempt deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a status the response policy refuses.
    #[error("server rejected mutation with status {status}")]
    Application {
        /// HTTP status code returned by the server.
        status: u16,
    },

    /// The journal contains a record that cannot be trusted.
    #[error("queue corruption at offset {offset}: {message}")]
    QueueCorruption {
        /// Byte offset of the bad record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// A journal record failed its checksum.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Byte offset of the bad record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// I/O error from the journal store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Journal record encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Another process holds the journal lock.
    #[error("journal locked: another process has exclusive access")]
    JournalLocked,

    /// A read went past the end of the journal store.
    #[error("read beyond end of journal: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Current store size.
        size: u64,
    },

    /// The HTTP method is not one the outbox replays.
    #[error("unsupported method: {0}")]
    InvalidMethod(String),

    /// Configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No mutation with this id exists in the requested set.
    #[error("mutation not found: {0}")]
    NotFound(MutationId),
}

impl OutboxError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a corruption error for the record at `offset`.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::QueueCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Returns true if a later replay of the same mutation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            OutboxError::Transport { retryable, .. } => *retryable,
            OutboxError::Timeout => true,
            OutboxError::Application { status } => {
                crate::policy::ResponsePolicy::StatusAware.is_retryable_status(*status)
            }
            _ => false,
        }
    }

    /// Returns true if this error means the journal cannot be replayed as-is.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            OutboxError::QueueCorruption { .. } | OutboxError::ChecksumMismatch { .. }
        )
    }
}
