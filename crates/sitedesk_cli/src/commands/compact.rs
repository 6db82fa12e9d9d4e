//! Compact command implementation.

use super::{open_offline, require_journal};
use sitedesk_outbox::{FileLogStore, Journal};
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;

    let (records, bytes_before) = {
        let journal = Journal::new(FileLogStore::open(path)?);
        let scan = journal.scan()?;
        (scan.records.len(), scan.total_len)
    };

    let outbox = open_offline(path)?;
    let live = outbox.len() + outbox.dead_letters().len();
    let dead = records.saturating_sub(live);

    println!("Journal: {records} records, {bytes_before} bytes");
    println!("  Live records: {live}");
    println!("  Dead records: {dead}");

    if dry_run {
        println!();
        println!("Dry run: no changes made");
        return Ok(());
    }

    outbox.compact()?;
    drop(outbox);

    let bytes_after = std::fs::metadata(path)?.len();
    println!();
    println!(
        "Compacted: {bytes_before} -> {bytes_after} bytes ({} reclaimed)",
        bytes_before.saturating_sub(bytes_after)
    );
    Ok(())
}
