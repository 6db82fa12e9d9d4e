//! Pending mutation records.
//!
//! A [`PendingMutation`] is the immutable description of one write the UI
//! performed: which endpoint, which HTTP method, and the JSON body. Retry
//! bookkeeping is kept by the queue beside the record, never inside it.

use crate::error::{OutboxError, OutboxResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Globally unique identifier of a queued mutation.
///
/// Formatted as `<unix-millis-hex>-<random-hex>`. The random suffix keeps
/// ids distinct for calls made within the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(String);

impl MutationId {
    /// Generates a fresh id stamped with `now_ms`.
    pub fn generate(now_ms: u64) -> Self {
        let suffix: u64 = rand::thread_rng().gen();
        Self(format!("{now_ms:011x}-{suffix:016x}"))
    }

    /// Wraps an existing id string (for ids read back from storage or the CLI).
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MutationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// HTTP method of a replayed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Partial update.
    Patch,
    /// Remove.
    Delete,
}

impl Method {
    /// Returns the canonical upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = OutboxError;

    fn from_str(s: &str) -> OutboxResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(OutboxError::InvalidMethod(s.to_string())),
        }
    }
}

/// A write recorded while the client may be offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    id: MutationId,
    endpoint: String,
    method: Method,
    payload: Value,
    enqueued_at_ms: u64,
}

impl PendingMutation {
    /// Creates a mutation with a freshly generated id stamped with the current time.
    pub fn new(endpoint: impl Into<String>, method: Method, payload: Value) -> Self {
        let now_ms = unix_millis();
        Self {
            id: MutationId::generate(now_ms),
            endpoint: endpoint.into(),
            method,
            payload,
            enqueued_at_ms: now_ms,
        }
    }

    /// Returns the mutation id.
    #[must_use]
    pub fn id(&self) -> &MutationId {
        &self.id
    }

    /// Returns the target endpoint (path relative to the server base URL).
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the JSON body.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns the enqueue time in Unix milliseconds.
    #[must_use]
    pub fn enqueued_at_ms(&self) -> u64 {
        self.enqueued_at_ms
    }

    /// Returns the resource this mutation touches.
    ///
    /// This is the first non-empty path segment of the endpoint, so
    /// `POST /widgets` and `PATCH /widgets/42` share the key `widgets`.
    /// Entries sharing a key are treated as dependent during a drain pass.
    #[must_use]
    pub fn resource_key(&self) -> &str {
        let path = self
            .endpoint
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let path = match path.find("://") {
            Some(scheme_end) => {
                let rest = &path[scheme_end + 3..];
                rest.find('/').map_or("", |i| &rest[i..])
            }
            None => path,
        };
        path.split('/').find(|s| !s.is_empty()).unwrap_or_default()
    }
}

/// Returns the current wall-clock time in Unix milliseconds.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
