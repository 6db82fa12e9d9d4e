//! Enqueue command implementation.

use super::open_offline;
use sitedesk_outbox::Method;
use std::path::Path;

/// Runs the enqueue command.
pub fn run(
    path: &Path,
    method: &str,
    endpoint: &str,
    data: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let method: Method = method.parse()?;
    let payload: serde_json::Value = serde_json::from_str(data)?;

    let outbox = open_offline(path)?;
    let id = outbox.enqueue(endpoint, method, payload)?;
    println!("{id}");
    Ok(())
}
