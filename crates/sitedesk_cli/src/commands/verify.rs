//! Verify command implementation.

use super::require_journal;
use sitedesk_outbox::{FileLogStore, Journal};
use std::path::Path;

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;
    println!("Verifying journal at {:?}", path);
    println!();

    let journal = Journal::new(FileLogStore::open(path)?);
    let scan = journal.scan()?;

    println!("  Records:     {}", scan.records.len());
    println!("  Valid bytes: {} / {}", scan.valid_len, scan.total_len);

    if scan.has_torn_tail() {
        println!(
            "  Torn tail:   {} bytes (trimmed on next open)",
            scan.total_len - scan.valid_len
        );
    }

    println!();
    match scan.corruption {
        None => {
            println!("✓ Journal verification passed");
            Ok(())
        }
        Some(err) => {
            println!("  Error: {err}");
            println!("✗ Journal verification failed");
            Err("Verification failed".into())
        }
    }
}
