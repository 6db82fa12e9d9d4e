//! Dump command implementation.

use super::require_journal;
use serde::Serialize;
use sitedesk_outbox::{FileLogStore, Journal, JournalRecord};
use std::path::Path;

/// Journal record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset in the journal file.
    pub offset: u64,
    /// Record type.
    pub record_type: String,
    /// Mutation id.
    pub mutation_id: String,
    /// Endpoint, for records that carry the mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Dead-letter reason, if applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RecordInfo {
    fn new(offset: u64, record: &JournalRecord) -> Self {
        let (endpoint, reason) = match record {
            JournalRecord::Enqueued(m) => (Some(m.endpoint().to_string()), None),
            JournalRecord::DeadLettered(d) => (
                Some(d.mutation.endpoint().to_string()),
                Some(d.reason.to_string()),
            ),
            _ => (None, None),
        };
        Self {
            offset,
            record_type: format!("{:?}", record.record_type()),
            mutation_id: record.mutation_id().to_string(),
            endpoint,
            reason,
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;
    let journal = Journal::new(FileLogStore::open(path)?);
    let scan = journal.scan()?;

    let records: Vec<RecordInfo> = scan
        .records
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(offset, record)| RecordInfo::new(*offset, record))
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            println!("{:>10}  {:<13} {:<30} DETAIL", "OFFSET", "TYPE", "MUTATION");
            for r in &records {
                let detail = match (&r.endpoint, &r.reason) {
                    (Some(e), Some(reason)) => format!("{e} ({reason})"),
                    (Some(e), None) => e.clone(),
                    _ => String::new(),
                };
                println!(
                    "{:>10}  {:<13} {:<30} {}",
                    r.offset, r.record_type, r.mutation_id, detail
                );
            }
            if let Some(err) = &scan.corruption {
                println!();
                println!("Stopped at corruption: {err}");
            }
        }
    }
    Ok(())
}
