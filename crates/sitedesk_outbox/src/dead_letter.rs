//! Mutations excluded from further automatic retry.

use crate::mutation::PendingMutation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a mutation was dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The server refused the write with a permanent status.
    Rejected {
        /// HTTP status returned by the server.
        status: u16,
    },
    /// Retryable failures repeated until the attempt limit was reached.
    AttemptsExhausted {
        /// Attempts made, including the last one.
        attempts: u32,
        /// The error from the final attempt.
        last_error: String,
    },
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadLetterReason::Rejected { status } => write!(f, "rejected with status {status}"),
            DeadLetterReason::AttemptsExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
        }
    }
}

/// A mutation parked outside the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The original mutation, unchanged.
    pub mutation: PendingMutation,
    /// Why it was parked.
    pub reason: DeadLetterReason,
    /// When it was parked, in Unix milliseconds.
    pub dead_lettered_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_display() {
        assert_eq!(
            DeadLetterReason::Rejected { status: 422 }.to_string(),
            "rejected with status 422"
        );
        let exhausted = DeadLetterReason::AttemptsExhausted {
            attempts: 5,
            last_error: "request timed out".into(),
        };
        assert_eq!(
            exhausted.to_string(),
            "gave up after 5 attempts: request timed out"
        );
    }
}
