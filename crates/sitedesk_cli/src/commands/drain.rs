//! Drain command implementation.

use super::require_journal;
use sitedesk_outbox::{
    DrainOutcome, HttpTransport, Outbox, OutboxConfig, ReqwestClient, ResponsePolicy,
};
use std::path::Path;
use std::time::Duration;

/// Runs the drain command.
pub fn run(
    path: &Path,
    base_url: &str,
    timeout_secs: u64,
    any_response: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    require_journal(path)?;

    let timeout = Duration::from_secs(timeout_secs);
    let policy = if any_response {
        ResponsePolicy::AnyResponse
    } else {
        ResponsePolicy::StatusAware
    };
    let config = OutboxConfig::new()
        .with_request_timeout(timeout)
        .with_response_policy(policy);
    let transport = HttpTransport::new(base_url, ReqwestClient::new(timeout)?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let outcome = runtime.block_on(async {
        let outbox = Outbox::builder(transport)
            .config(config)
            .journal_file(path)
            .open()?;
        let outcome = outbox.drain().await;
        Ok::<_, sitedesk_outbox::OutboxError>((outcome, outbox.status()))
    })?;

    match outcome {
        (DrainOutcome::Skipped(reason), status) => {
            println!("Nothing to do ({reason})");
            println!("{}", status.status_label);
        }
        (DrainOutcome::Completed(report), status) => {
            println!("Drain finished in {:?}", report.elapsed);
            println!("  Attempted:     {}", report.attempted);
            println!("  Applied:       {}", report.applied);
            println!("  Retried:       {}", report.retried);
            println!("  Dead-lettered: {}", report.dead_lettered);
            println!("  Deferred:      {}", report.deferred);
            if let Some(interruption) = report.interrupted {
                println!("  Stopped early: {interruption:?}");
            }
            println!();
            println!("{}", status.status_label);
        }
    }
    Ok(())
}
