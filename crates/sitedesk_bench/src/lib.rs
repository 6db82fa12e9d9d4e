//! Shared fixtures for the outbox benchmarks.

use serde_json::{json, Value};

/// A widget-shaped JSON body that varies with `i`.
pub fn sample_payload(i: usize) -> Value {
    json!({"name": format!("widget-{i}"), "site": i % 17, "tags": ["a", "b"]})
}

/// A body whose `notes` field is `len` bytes long.
pub fn sized_payload(len: usize) -> Value {
    json!({"notes": "x".repeat(len), "qty": 3, "site": {"id": 7}})
}
