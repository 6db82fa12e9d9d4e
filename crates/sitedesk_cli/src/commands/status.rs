//! Status and list command implementations.

use super::{open_offline, require_journal};
use serde::Serialize;
use std::path::Path;

/// Pending entry representation for output.
#[derive(Debug, Serialize)]
pub struct PendingInfo {
    /// Position in replay order.
    pub position: usize,
    /// Mutation id.
    pub id: String,
    /// HTTP method.
    pub method: String,
    /// Endpoint path.
    pub endpoint: String,
    /// Enqueue time, Unix milliseconds.
    pub enqueued_at_ms: u64,
    /// JSON body.
    pub payload: serde_json::Value,
}

/// Runs the status command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;
    let outbox = open_offline(path)?;
    let status = outbox.status();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => {
            println!("{}", status.status_label);
            println!("  Pending:      {}", status.pending_count);
            println!("  Dead letters: {}", status.dead_letter_count);
        }
    }
    Ok(())
}

/// Runs the list command.
pub fn list(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;
    let outbox = open_offline(path)?;
    let entries: Vec<PendingInfo> = outbox
        .pending()
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(position, entry)| PendingInfo {
            position,
            id: entry.mutation.id().to_string(),
            method: entry.mutation.method().to_string(),
            endpoint: entry.mutation.endpoint().to_string(),
            enqueued_at_ms: entry.mutation.enqueued_at_ms(),
            payload: entry.mutation.payload().clone(),
        })
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => {
            if entries.is_empty() {
                println!("No pending mutations");
            }
            for e in &entries {
                println!("{:>4}  {}  {:<6} {}", e.position, e.id, e.method, e.endpoint);
            }
        }
    }
    Ok(())
}
