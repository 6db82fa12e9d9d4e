//! Dead-letter command implementations.

use super::{open_offline, require_journal};
use serde::Serialize;
use sitedesk_outbox::MutationId;
use std::path::Path;

/// Dead letter representation for output.
#[derive(Debug, Serialize)]
pub struct DeadLetterInfo {
    /// Mutation id.
    pub id: String,
    /// HTTP method.
    pub method: String,
    /// Endpoint path.
    pub endpoint: String,
    /// Why the mutation was parked.
    pub reason: String,
    /// When it was parked, Unix milliseconds.
    pub dead_lettered_at_ms: u64,
}

/// Runs the dead-letters command.
pub fn list(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;
    let outbox = open_offline(path)?;
    let letters: Vec<DeadLetterInfo> = outbox
        .dead_letters()
        .into_iter()
        .map(|d| DeadLetterInfo {
            id: d.mutation.id().to_string(),
            method: d.mutation.method().to_string(),
            endpoint: d.mutation.endpoint().to_string(),
            reason: d.reason.to_string(),
            dead_lettered_at_ms: d.dead_lettered_at_ms,
        })
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&letters)?),
        _ => {
            if letters.is_empty() {
                println!("No dead letters");
            }
            for d in &letters {
                println!("{}  {:<6} {}  ({})", d.id, d.method, d.endpoint, d.reason);
            }
        }
    }
    Ok(())
}

/// Runs the requeue command.
pub fn requeue(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;
    let outbox = open_offline(path)?;
    outbox.requeue_dead_letter(&MutationId::from(id))?;
    println!("Requeued {id}; {} pending", outbox.len());
    Ok(())
}

/// Runs the discard command.
pub fn discard(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;
    let outbox = open_offline(path)?;
    let dead = outbox.discard_dead_letter(&MutationId::from(id))?;
    println!(
        "Discarded {} {} {}",
        dead.mutation.id(),
        dead.mutation.method(),
        dead.mutation.endpoint()
    );
    Ok(())
}
