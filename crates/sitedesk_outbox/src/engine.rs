//! Drain engine.
//!
//! A drain pass replays a snapshot of the queue, one request at a time, in
//! queue order. At most one pass runs at once: the [`SyncState`] behind a
//! mutex is the single-flight guard, and a second caller that finds it in
//! `Syncing` returns [`DrainOutcome::Skipped`] without touching the network.
//!
//! Within a pass, once an entry for a resource fails or is deferred, later
//! entries for the same resource are deferred too, so a dependent update is
//! never sent ahead of the create it depends on.

use crate::config::OutboxConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::dead_letter::DeadLetterReason;
use crate::error::OutboxError;
use crate::invalidate::CacheInvalidator;
use crate::mutation::MutationId;
use crate::policy::ReplayVerdict;
use crate::queue::{FailureDisposition, MutationQueue, QueuedMutation};
use crate::status::{StatusReporter, SyncState, SyncStatus};
use crate::transport::{MutationTransport, ReplayRequest};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a drain call did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another pass is running.
    AlreadySyncing,
    /// Connectivity is offline.
    Offline,
    /// Nothing is queued.
    Empty,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadySyncing => f.write_str("already syncing"),
            SkipReason::Offline => f.write_str("offline"),
            SkipReason::Empty => f.write_str("queue empty"),
        }
    }
}

/// Why a pass stopped before reaching the end of its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// Connectivity went offline.
    Offline,
    /// The drain budget ran out.
    BudgetExhausted,
}

/// Summary of one completed drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Requests issued.
    pub attempted: usize,
    /// Entries the server applied.
    pub applied: usize,
    /// Entries left queued for a later retry.
    pub retried: usize,
    /// Entries moved to the dead-letter set.
    pub dead_lettered: usize,
    /// Entries skipped for backoff or a blocked resource.
    pub deferred: usize,
    /// Queue length after the pass.
    pub remaining: usize,
    /// State the pass ended in.
    pub state: SyncState,
    /// Set if the pass stopped early.
    pub interrupted: Option<Interruption>,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

/// Result of a drain call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The call was a no-op.
    Skipped(SkipReason),
    /// A pass ran.
    Completed(DrainReport),
}

impl DrainOutcome {
    /// Returns the report if a pass ran.
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            DrainOutcome::Skipped(_) => None,
        }
    }

    /// Returns true if the call was a no-op.
    pub fn is_skipped(&self) -> bool {
        matches!(self, DrainOutcome::Skipped(_))
    }
}

/// Cumulative drain statistics.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that ran to completion or interruption.
    pub passes_completed: u64,
    /// Drain calls that were skipped.
    pub passes_skipped: u64,
    /// Requests issued.
    pub requests_sent: u64,
    /// Mutations the server applied.
    pub mutations_applied: u64,
    /// Failed attempts that were scheduled for retry.
    pub retries: u64,
    /// Mutations moved to the dead-letter set.
    pub dead_lettered: u64,
    /// Cache invalidations issued.
    pub invalidations: u64,
    /// When the last pass finished.
    pub last_pass_at: Option<Instant>,
    /// Last per-mutation error seen.
    pub last_error: Option<String>,
}

/// Resets the single-flight state if a pass is abandoned mid-way.
struct DrainGuard<'a> {
    engine: &'a SyncEngine,
    previous: SyncState,
    finished: bool,
}

impl DrainGuard<'_> {
    fn finish(mut self, state: SyncState) {
        *self.engine.state.lock() = state;
        self.finished = true;
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("drain pass abandoned before completion");
            // Entries resolved before the pass was dropped are already on the server.
            self.engine.flush_invalidation();
            *self.engine.state.lock() = self.previous;
            self.engine.publish_status();
        }
    }
}

/// What happened to one entry.
enum EntryResult {
    Applied,
    Retried,
    DeadLettered,
}

/// Replays the queue against the server.
pub struct SyncEngine {
    queue: Arc<MutationQueue>,
    transport: Arc<dyn MutationTransport>,
    invalidator: Arc<dyn CacheInvalidator>,
    connectivity: Arc<ConnectivityMonitor>,
    status: Arc<StatusReporter>,
    config: OutboxConfig,
    state: Mutex<SyncState>,
    stats: RwLock<SyncStats>,
    /// Entries applied in the current pass and not yet invalidated.
    applied_uninvalidated: AtomicUsize,
}

impl SyncEngine {
    /// Creates an engine over shared components.
    pub fn new(
        queue: Arc<MutationQueue>,
        transport: Arc<dyn MutationTransport>,
        invalidator: Arc<dyn CacheInvalidator>,
        connectivity: Arc<ConnectivityMonitor>,
        status: Arc<StatusReporter>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            invalidator,
            connectivity,
            status,
            config,
            state: Mutex::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            applied_uninvalidated: AtomicUsize::new(0),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Computes the current status.
    pub fn status(&self) -> SyncStatus {
        SyncStatus::new(
            self.queue.len(),
            self.state(),
            self.queue.dead_letter_count(),
            self.connectivity.current(),
        )
    }

    /// Publishes the current status to subscribers.
    pub fn publish_status(&self) {
        self.status.publish(self.status());
    }

    /// Runs one drain pass unless one is running, the queue is empty or
    /// connectivity is offline.
    pub async fn drain(&self) -> DrainOutcome {
        let guard = match self.begin() {
            Ok(guard) => guard,
            Err(reason) => {
                tracing::debug!(reason = %reason, "drain skipped");
                self.stats.write().passes_skipped += 1;
                return DrainOutcome::Skipped(reason);
            }
        };
        self.publish_status();

        let report = self.run_pass().await;
        guard.finish(report.state);

        {
            let mut stats = self.stats.write();
            stats.passes_completed += 1;
            stats.last_pass_at = Some(Instant::now());
        }
        self.publish_status();

        tracing::info!(
            attempted = report.attempted,
            applied = report.applied,
            retried = report.retried,
            dead_lettered = report.dead_lettered,
            deferred = report.deferred,
            remaining = report.remaining,
            state = %report.state,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "drain pass finished"
        );
        DrainOutcome::Completed(report)
    }

    fn begin(&self) -> Result<DrainGuard<'_>, SkipReason> {
        let mut state = self.state.lock();
        if state.is_syncing() {
            return Err(SkipReason::AlreadySyncing);
        }
        if self.connectivity.is_offline() {
            return Err(SkipReason::Offline);
        }
        if self.queue.is_empty() {
            return Err(SkipReason::Empty);
        }

        let previous = *state;
        *state = SyncState::Syncing;
        Ok(DrainGuard {
            engine: self,
            previous,
            finished: false,
        })
    }

    async fn run_pass(&self) -> DrainReport {
        let started = tokio::time::Instant::now();
        let snapshot = self.queue.snapshot();
        tracing::info!(pending = snapshot.len(), "drain pass started");

        let mut report = DrainReport {
            attempted: 0,
            applied: 0,
            retried: 0,
            dead_lettered: 0,
            deferred: 0,
            remaining: 0,
            state: SyncState::Syncing,
            interrupted: None,
            elapsed: Duration::ZERO,
        };
        let mut blocked: HashSet<String> = HashSet::new();

        for entry in snapshot {
            if self.connectivity.is_offline() {
                tracing::info!("connectivity lost, stopping drain pass");
                report.interrupted = Some(Interruption::Offline);
                break;
            }
            if let Some(budget) = self.config.drain_budget {
                if started.elapsed() >= budget {
                    tracing::warn!(budget_ms = budget.as_millis() as u64, "drain budget spent");
                    report.interrupted = Some(Interruption::BudgetExhausted);
                    break;
                }
            }

            let key = entry.mutation.resource_key().to_string();
            if blocked.contains(&key) {
                tracing::debug!(mutation_id = %entry.mutation.id(), resource = %key, "deferred behind earlier failure");
                report.deferred += 1;
                continue;
            }
            // Resolved or dead-lettered since the snapshot was taken.
            let Some(entry) = self.queue.get(entry.mutation.id()) else {
                continue;
            };
            let now = tokio::time::Instant::now().into_std();
            if !entry.delivery.is_due(now) {
                report.deferred += 1;
                blocked.insert(key);
                continue;
            }

            report.attempted += 1;
            match self.replay_entry(&entry, now).await {
                EntryResult::Applied => report.applied += 1,
                EntryResult::Retried => {
                    report.retried += 1;
                    blocked.insert(key);
                }
                EntryResult::DeadLettered => {
                    report.dead_lettered += 1;
                    blocked.insert(key);
                }
            }
        }

        self.flush_invalidation();

        report.remaining = self.queue.len();
        let removed = report.applied + report.dead_lettered;
        report.state = if report.remaining == 0 {
            SyncState::Idle
        } else if removed > 0 {
            SyncState::PartiallySynced
        } else {
            SyncState::Failed
        };
        report.elapsed = started.elapsed();
        report
    }

    async fn replay_entry(&self, entry: &QueuedMutation, now: Instant) -> EntryResult {
        let mutation = &entry.mutation;
        let id = mutation.id();
        let request = ReplayRequest::for_mutation(mutation);

        tracing::debug!(
            mutation_id = %id,
            method = %mutation.method(),
            endpoint = mutation.endpoint(),
            attempt = entry.delivery.attempts + 1,
            "replaying mutation"
        );
        self.stats.write().requests_sent += 1;

        let result = match tokio::time::timeout(
            self.config.request_timeout,
            self.transport.replay(&request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OutboxError::Timeout),
        };

        match result {
            Ok(response) => match self.config.response_policy.classify(response.status) {
                ReplayVerdict::Applied => {
                    if let Err(e) = self.queue.resolve(id) {
                        tracing::warn!(mutation_id = %id, error = %e, "failed to journal resolve");
                    }
                    self.applied_uninvalidated.fetch_add(1, Ordering::AcqRel);
                    self.stats.write().mutations_applied += 1;
                    tracing::debug!(mutation_id = %id, status = response.status, "mutation applied");
                    EntryResult::Applied
                }
                ReplayVerdict::Retry => {
                    let error = OutboxError::Application {
                        status: response.status,
                    };
                    self.record_failure(id, &error.to_string(), now)
                }
                ReplayVerdict::Reject => {
                    tracing::warn!(mutation_id = %id, status = response.status, "server rejected mutation");
                    self.dead_letter(
                        id,
                        DeadLetterReason::Rejected {
                            status: response.status,
                        },
                    )
                }
            },
            Err(e) if e.is_retryable() => self.record_failure(id, &e.to_string(), now),
            Err(e) => {
                tracing::warn!(mutation_id = %id, error = %e, "replay failed permanently");
                self.dead_letter(
                    id,
                    DeadLetterReason::AttemptsExhausted {
                        attempts: entry.delivery.attempts + 1,
                        last_error: e.to_string(),
                    },
                )
            }
        }
    }

    /// Invalidates the read cache once if anything was applied since the last call.
    fn flush_invalidation(&self) {
        if self.applied_uninvalidated.swap(0, Ordering::AcqRel) > 0 {
            self.invalidator.invalidate_all();
            self.stats.write().invalidations += 1;
        }
    }

    fn record_failure(&self, id: &MutationId, error: &str, now: Instant) -> EntryResult {
        self.stats.write().last_error = Some(error.to_string());
        match self
            .queue
            .record_failure(id, error, &self.config.retry, now)
        {
            Ok(FailureDisposition::DeadLettered { attempts }) => {
                tracing::warn!(mutation_id = %id, attempts, error, "retry budget exhausted");
                self.stats.write().dead_lettered += 1;
                EntryResult::DeadLettered
            }
            Ok(FailureDisposition::Retry {
                attempts,
                next_attempt_at,
            }) => {
                tracing::warn!(
                    mutation_id = %id,
                    attempts,
                    retry_in_ms = next_attempt_at.saturating_duration_since(now).as_millis() as u64,
                    error,
                    "replay failed, will retry"
                );
                self.stats.write().retries += 1;
                EntryResult::Retried
            }
            Ok(FailureDisposition::NotQueued) => EntryResult::Retried,
            Err(e) => {
                tracing::warn!(mutation_id = %id, error = %e, "failed to journal dead letter");
                EntryResult::Retried
            }
        }
    }

    fn dead_letter(&self, id: &MutationId, reason: DeadLetterReason) -> EntryResult {
        self.stats.write().last_error = Some(reason.to_string());
        match self.queue.dead_letter(id, reason) {
            Ok(_) => {
                self.stats.write().dead_lettered += 1;
                EntryResult::DeadLettered
            }
            Err(e) => {
                tracing::warn!(mutation_id = %id, error = %e, "failed to journal dead letter");
                EntryResult::Retried
            }
        }
    }
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
