//! CLI command implementations.

pub mod compact;
pub mod dead_letters;
pub mod drain;
pub mod dump;
pub mod enqueue;
pub mod status;
pub mod verify;

use sitedesk_outbox::{
    Connectivity, MutationTransport, Outbox, OutboxError, OutboxResult, ReplayFuture,
    ReplayRequest,
};
use std::path::Path;

/// Transport for commands that only inspect or edit the journal.
struct NoNetwork;

impl MutationTransport for NoNetwork {
    fn replay<'a>(&'a self, _request: &'a ReplayRequest) -> ReplayFuture<'a> {
        Box::pin(async { Err(OutboxError::transport_fatal("network disabled")) })
    }
}

/// Opens the journal at `path` with connectivity forced offline.
pub(crate) fn open_offline(path: &Path) -> OutboxResult<Outbox> {
    Outbox::builder(NoNetwork)
        .journal_file(path)
        .connectivity(Connectivity::Offline)
        .open()
}

/// Fails unless a journal exists at `path`.
pub(crate) fn require_journal(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        Ok(())
    } else {
        Err(format!("journal not found: {}", path.display()).into())
    }
}
