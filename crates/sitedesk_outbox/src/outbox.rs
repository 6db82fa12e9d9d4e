//! Session-scoped outbox handle.
//!
//! [`Outbox`] owns the queue, the engine and the connectivity and status
//! channels for one session. It is cheap to clone; every clone refers to
//! the same queue.

use crate::config::OutboxConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor, Transition};
use crate::dead_letter::DeadLetter;
use crate::engine::{DrainOutcome, SyncEngine, SyncStats};
use crate::error::OutboxResult;
use crate::invalidate::{CacheInvalidator, NoopInvalidator};
use crate::journal::Journal;
use crate::mutation::{Method, MutationId};
use crate::queue::{MutationQueue, QueueOptions, QueuedMutation};
use crate::status::{StatusReporter, SyncState, SyncStatus};
use crate::store::{FileLogStore, LogStore};
use crate::transport::MutationTransport;
use crate::worker::{SyncWorker, WorkerHandle};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Notify};

enum JournalSource {
    None,
    Store(Box<dyn LogStore>),
    Path(PathBuf),
}

/// Builder for [`Outbox`].
pub struct OutboxBuilder {
    transport: Arc<dyn MutationTransport>,
    config: OutboxConfig,
    journal: JournalSource,
    invalidator: Arc<dyn CacheInvalidator>,
    connectivity: Connectivity,
}

impl OutboxBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Persists the queue in `store`.
    pub fn journal(mut self, store: impl LogStore + 'static) -> Self {
        self.journal = JournalSource::Store(Box::new(store));
        self
    }

    /// Persists the queue in a file at `path`, opened and locked by [`OutboxBuilder::open`].
    pub fn journal_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal = JournalSource::Path(path.into());
        self
    }

    /// Sets the cache invalidator.
    pub fn invalidator(mut self, invalidator: impl CacheInvalidator + 'static) -> Self {
        self.invalidator = Arc::new(invalidator);
        self
    }

    /// Sets the initial connectivity. Defaults to online.
    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Validates the configuration, replays the journal and builds the outbox.
    pub fn open(self) -> OutboxResult<Outbox> {
        self.config.validate()?;

        let options = QueueOptions {
            corruption_policy: self.config.corruption_policy,
            compact_threshold: self.config.compact_threshold,
        };
        let queue = match self.journal {
            JournalSource::None => MutationQueue::in_memory(),
            JournalSource::Store(store) => {
                MutationQueue::open(Journal::from_boxed(store), options)?
            }
            JournalSource::Path(path) => {
                MutationQueue::open(Journal::new(FileLogStore::open(&path)?), options)?
            }
        };
        let queue = Arc::new(queue);

        let connectivity = Arc::new(ConnectivityMonitor::new(self.connectivity));
        let status = Arc::new(StatusReporter::new(SyncStatus::new(
            queue.len(),
            SyncState::Idle,
            queue.dead_letter_count(),
            self.connectivity,
        )));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue),
            self.transport,
            self.invalidator,
            Arc::clone(&connectivity),
            Arc::clone(&status),
            self.config,
        ));

        Ok(Outbox {
            queue,
            engine,
            connectivity,
            status,
            wake: Arc::new(Notify::new()),
        })
    }
}

/// Offline mutation outbox for one session.
#[derive(Clone)]
pub struct Outbox {
    queue: Arc<MutationQueue>,
    engine: Arc<SyncEngine>,
    connectivity: Arc<ConnectivityMonitor>,
    status: Arc<StatusReporter>,
    wake: Arc<Notify>,
}

impl Outbox {
    /// Starts building an outbox that replays through `transport`.
    pub fn builder(transport: impl MutationTransport + 'static) -> OutboxBuilder {
        OutboxBuilder {
            transport: Arc::new(transport),
            config: OutboxConfig::default(),
            journal: JournalSource::None,
            invalidator: Arc::new(NoopInvalidator),
            connectivity: Connectivity::Online,
        }
    }

    /// Queues a write and returns its id.
    ///
    /// While online this also wakes the worker, if one is running.
    pub fn enqueue(
        &self,
        endpoint: impl Into<String>,
        method: Method,
        payload: Value,
    ) -> OutboxResult<MutationId> {
        let id = self.queue.enqueue(endpoint, method, payload)?;
        self.engine.publish_status();
        if !self.connectivity.is_offline() {
            self.wake.notify_one();
        }
        Ok(id)
    }

    /// Number of pending mutations.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the pending entries in queue order.
    pub fn pending(&self) -> Vec<QueuedMutation> {
        self.queue.snapshot()
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// Subscribes to status updates.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Returns the current sync state.
    pub fn state(&self) -> SyncState {
        self.engine.state()
    }

    /// Returns the current connectivity.
    pub fn connectivity(&self) -> Connectivity {
        self.connectivity.current()
    }

    /// Subscribes to connectivity changes.
    pub fn subscribe_connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity.subscribe()
    }

    /// Records a connectivity signal from the host.
    ///
    /// An offline-to-online edge wakes the worker. Duplicate signals do
    /// nothing.
    pub fn set_connectivity(&self, state: Connectivity) -> Option<Transition> {
        let transition = self.connectivity.set(state);
        if transition.is_some() {
            self.engine.publish_status();
        }
        if transition == Some(Transition::Restored) {
            self.wake.notify_one();
        }
        transition
    }

    /// Runs one drain pass now.
    pub async fn drain(&self) -> DrainOutcome {
        self.engine.drain().await
    }

    /// Returns the dead-letter set.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.queue.dead_letters()
    }

    /// Puts a dead letter back at the tail of the queue.
    pub fn requeue_dead_letter(&self, id: &MutationId) -> OutboxResult<()> {
        self.queue.requeue_dead_letter(id)?;
        self.engine.publish_status();
        if !self.connectivity.is_offline() {
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Drops a dead letter for good.
    pub fn discard_dead_letter(&self, id: &MutationId) -> OutboxResult<DeadLetter> {
        let dead = self.queue.discard_dead_letter(id)?;
        self.engine.publish_status();
        Ok(dead)
    }

    /// Rewrites the journal to hold only live records.
    pub fn compact(&self) -> OutboxResult<()> {
        self.queue.compact()
    }

    /// Returns cumulative drain statistics.
    pub fn stats(&self) -> SyncStats {
        self.engine.stats()
    }

    /// Spawns the background worker on the current tokio runtime.
    pub fn spawn_worker(&self) -> WorkerHandle {
        SyncWorker::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.queue),
            Arc::clone(&self.connectivity),
            Arc::clone(&self.wake),
            self.engine.config().poll_interval,
        )
        .spawn()
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("queue", &self.queue)
            .field("connectivity", &self.connectivity.current())
            .field("state", &self.engine.state())
            .finish()
    }
}
