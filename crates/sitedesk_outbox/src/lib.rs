//! # SiteDesk Outbox
//!
//! Offline mutation queue and reconciliation engine for the SiteDesk admin
//! dashboard.
//!
//! This crate provides:
//! - A global FIFO queue of pending writes (endpoint, method, JSON body)
//! - A CRC-framed journal so the queue survives restarts
//! - A single-flight drain engine that replays the queue on reconnect
//! - Retry with exponential backoff and a dead-letter set
//! - Status publishing for the UI and a read-cache invalidation hook
//!
//! ## Architecture
//!
//! Writes made by the UI go into the queue first. When the session is
//! online, the background worker drains the queue one request at a time in
//! enqueue order:
//! 1. A 2xx response resolves the entry
//! 2. A transient failure schedules a retry and blocks later entries for
//!    the same resource in that pass
//! 3. A permanent refusal moves the entry to the dead-letter set
//!
//! After a pass that applied anything, the read cache is invalidated once.
//!
//! ## Key Invariants
//!
//! - Replay order equals enqueue order
//! - At most one drain pass runs at a time
//! - The journal is replayed before the first new write is accepted
//! - A queued mutation is never modified, only resolved or dead-lettered
//!
//! ## Example
//!
//! ```rust,no_run
//! use sitedesk_outbox::{Connectivity, Method, MockTransport, Outbox};
//! use serde_json::json;
//!
//! # async fn run() -> sitedesk_outbox::OutboxResult<()> {
//! let outbox = Outbox::builder(MockTransport::new())
//!     .journal_file("outbox.journal")
//!     .connectivity(Connectivity::Offline)
//!     .open()?;
//! let worker = outbox.spawn_worker();
//!
//! outbox.enqueue("/widgets", Method::Post, json!({"name": "x"}))?;
//! assert_eq!(outbox.status().status_label, "1 changes pending");
//!
//! outbox.set_connectivity(Connectivity::Online);
//! worker.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod dead_letter;
mod engine;
mod error;
mod http;
mod invalidate;
pub mod journal;
mod mutation;
mod outbox;
mod policy;
mod queue;
mod status;
pub mod store;
mod transport;
mod worker;

pub use config::{OutboxConfig, RetryConfig};
pub use connectivity::{Connectivity, ConnectivityMonitor, Transition};
pub use dead_letter::{DeadLetter, DeadLetterReason};
pub use engine::{DrainOutcome, DrainReport, Interruption, SkipReason, SyncEngine, SyncStats};
pub use error::{OutboxError, OutboxResult};
#[cfg(feature = "reqwest-client")]
pub use http::ReqwestClient;
pub use http::{HttpClient, HttpFuture, HttpTransport};
pub use invalidate::{CacheInvalidator, FnInvalidator, GenerationInvalidator, NoopInvalidator};
pub use journal::{CorruptionPolicy, Journal, JournalRecord, JournalScan};
pub use mutation::{Method, MutationId, PendingMutation};
pub use outbox::{Outbox, OutboxBuilder};
pub use policy::{ReplayVerdict, ResponsePolicy};
pub use queue::{Delivery, FailureDisposition, MutationQueue, QueueOptions, QueuedMutation};
pub use status::{status_label, StatusReporter, SyncState, SyncStatus};
pub use store::{FileLogStore, LogStore, MemoryLogStore};
pub use transport::{
    MockReply, MockTransport, MutationTransport, ReplayFuture, ReplayRequest, ReplayResponse,
};
pub use worker::WorkerHandle;
