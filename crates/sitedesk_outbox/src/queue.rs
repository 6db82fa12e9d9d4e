//! Ordered queue of pending mutations.
//!
//! The queue is a single global FIFO: it is never sharded by resource or
//! endpoint, because a create followed by an update of the same entity must
//! reach the server in that order.
//!
//! When opened over a [`Journal`], every change is appended to the journal
//! before the in-memory state is updated, and the journal is replayed
//! before the queue accepts its first write.

use crate::config::RetryConfig;
use crate::dead_letter::{DeadLetter, DeadLetterReason};
use crate::error::{OutboxError, OutboxResult};
use crate::journal::{CorruptionPolicy, Journal, JournalRecord};
use crate::mutation::{unix_millis, Method, MutationId, PendingMutation};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Options used when opening a journaled queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// What to do with a corrupt journal.
    pub corruption_policy: CorruptionPolicy,
    /// Dead journal records tolerated before compaction.
    pub compact_threshold: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            corruption_policy: CorruptionPolicy::Fail,
            compact_threshold: 1024,
        }
    }
}

/// Retry bookkeeping kept beside an immutable mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Failed attempts so far.
    pub attempts: u32,
    /// Earliest instant the next attempt may be made.
    pub next_attempt_at: Option<Instant>,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
}

impl Delivery {
    /// Returns true if the backoff for this entry has elapsed at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// A queue entry: the mutation plus its delivery state.
#[derive(Debug, Clone)]
pub struct QueuedMutation {
    /// The mutation as recorded at enqueue time.
    pub mutation: Arc<PendingMutation>,
    /// Retry bookkeeping.
    pub delivery: Delivery,
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The entry stays queued until `next_attempt_at`.
    Retry {
        /// Failed attempts so far.
        attempts: u32,
        /// Earliest next attempt.
        next_attempt_at: Instant,
    },
    /// The attempt budget is spent; the entry moved to the dead-letter set.
    DeadLettered {
        /// Failed attempts in total.
        attempts: u32,
    },
    /// The entry was no longer queued.
    NotQueued,
}

struct QueueState {
    entries: VecDeque<QueuedMutation>,
    dead_letters: Vec<DeadLetter>,
    journal: Option<Journal>,
    /// Journal records that no longer describe live state.
    dead_records: usize,
}

impl QueueState {
    fn position(&self, id: &MutationId) -> Option<usize> {
        self.entries.iter().position(|e| e.mutation.id() == id)
    }

    fn dead_letter_position(&self, id: &MutationId) -> Option<usize> {
        self.dead_letters
            .iter()
            .position(|d| d.mutation.id() == id)
    }

    fn log(&mut self, record: &JournalRecord) -> OutboxResult<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(record)?;
        }
        Ok(())
    }

    fn apply_replayed(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Enqueued(mutation) => {
                if self.position(mutation.id()).is_some()
                    || self.dead_letter_position(mutation.id()).is_some()
                {
                    tracing::warn!(mutation_id = %mutation.id(), "duplicate enqueue record in journal");
                    return;
                }
                self.entries.push_back(QueuedMutation {
                    mutation: Arc::new(mutation),
                    delivery: Delivery::default(),
                });
            }
            JournalRecord::Resolved(id) => {
                if let Some(pos) = self.position(&id) {
                    self.entries.remove(pos);
                }
            }
            JournalRecord::DeadLettered(dead) => {
                if let Some(pos) = self.position(dead.mutation.id()) {
                    self.entries.remove(pos);
                }
                if self.dead_letter_position(dead.mutation.id()).is_none() {
                    self.dead_letters.push(dead);
                }
            }
            JournalRecord::Requeued(id) => {
                if let Some(pos) = self.dead_letter_position(&id) {
                    let dead = self.dead_letters.remove(pos);
                    self.entries.push_back(QueuedMutation {
                        mutation: Arc::new(dead.mutation),
                        delivery: Delivery::default(),
                    });
                }
            }
            JournalRecord::Discarded(id) => {
                if let Some(pos) = self.dead_letter_position(&id) {
                    self.dead_letters.remove(pos);
                }
            }
        }
    }

    fn live_records(&self) -> Vec<JournalRecord> {
        self.entries
            .iter()
            .map(|e| JournalRecord::Enqueued(PendingMutation::clone(&e.mutation)))
            .chain(
                self.dead_letters
                    .iter()
                    .cloned()
                    .map(JournalRecord::DeadLettered),
            )
            .collect()
    }

    fn compact(&mut self) -> OutboxResult<()> {
        let records = self.live_records();
        if let Some(journal) = self.journal.as_mut() {
            journal.rewrite(&records)?;
            tracing::info!(
                live_records = records.len(),
                dropped_records = self.dead_records,
                "compacted journal"
            );
        }
        self.dead_records = 0;
        Ok(())
    }

    fn maybe_compact(&mut self, threshold: usize) {
        if self.journal.is_none() || self.dead_records < threshold {
            return;
        }
        if let Err(e) = self.compact() {
            tracing::warn!(error = %e, "journal compaction failed");
        }
    }
}

/// The ordered list of mutations waiting to reach the server.
///
/// All methods take `&self`; the queue is shared behind an [`Arc`] and
/// guarded by an internal lock that is never held across an `.await`.
pub struct MutationQueue {
    state: Mutex<QueueState>,
    compact_threshold: usize,
}

impl MutationQueue {
    /// Creates an empty queue that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                dead_letters: Vec::new(),
                journal: None,
                dead_records: 0,
            }),
            compact_threshold: usize::MAX,
        }
    }

    /// Opens a queue over `journal`, replaying it first.
    pub fn open(mut journal: Journal, options: QueueOptions) -> OutboxResult<Self> {
        let records = journal.recover(options.corruption_policy)?;
        let record_count = records.len();

        let mut state = QueueState {
            entries: VecDeque::new(),
            dead_letters: Vec::new(),
            journal: None,
            dead_records: 0,
        };
        for record in records {
            state.apply_replayed(record);
        }
        state.dead_records =
            record_count.saturating_sub(state.entries.len() + state.dead_letters.len());
        state.journal = Some(journal);

        tracing::info!(
            replayed_records = record_count,
            pending = state.entries.len(),
            dead_letters = state.dead_letters.len(),
            "replayed outbox journal"
        );

        let queue = Self {
            state: Mutex::new(state),
            compact_threshold: options.compact_threshold,
        };
        queue.state.lock().maybe_compact(options.compact_threshold);
        Ok(queue)
    }

    /// Returns true if changes are written to a journal.
    pub fn is_durable(&self) -> bool {
        self.state.lock().journal.is_some()
    }

    /// Appends a new mutation and returns its id.
    ///
    /// An in-memory queue never fails. A journaled queue fails only if the
    /// journal write fails, in which case nothing is queued.
    pub fn enqueue(
        &self,
        endpoint: impl Into<String>,
        method: Method,
        payload: Value,
    ) -> OutboxResult<MutationId> {
        self.push(PendingMutation::new(endpoint, method, payload))
    }

    /// Appends an already built mutation.
    pub fn push(&self, mutation: PendingMutation) -> OutboxResult<MutationId> {
        let mut state = self.state.lock();
        state.log(&JournalRecord::Enqueued(mutation.clone()))?;

        let id = mutation.id().clone();
        tracing::debug!(
            mutation_id = %id,
            method = %mutation.method(),
            endpoint = mutation.endpoint(),
            "enqueued mutation"
        );
        state.entries.push_back(QueuedMutation {
            mutation: Arc::new(mutation),
            delivery: Delivery::default(),
        });
        Ok(id)
    }

    /// Number of pending mutations.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if no mutation is pending.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns true if `id` is pending.
    pub fn contains(&self, id: &MutationId) -> bool {
        self.state.lock().position(id).is_some()
    }

    /// Returns a copy of the entry for `id`, if pending.
    pub fn get(&self, id: &MutationId) -> Option<QueuedMutation> {
        let state = self.state.lock();
        state.position(id).map(|pos| state.entries[pos].clone())
    }

    /// Returns a consistent cut of the pending entries, in queue order.
    pub fn snapshot(&self) -> Vec<QueuedMutation> {
        self.state.lock().entries.iter().cloned().collect()
    }

    /// Removes `id` from the queue. Returns false if it was not pending.
    ///
    /// Calling this for an id that is not queued is a no-op. If the journal
    /// write fails the entry is still removed from memory and the error is
    /// returned; a restart may then replay it once more.
    pub fn resolve(&self, id: &MutationId) -> OutboxResult<bool> {
        let mut state = self.state.lock();
        let Some(pos) = state.position(id) else {
            return Ok(false);
        };

        state.entries.remove(pos);
        state.log(&JournalRecord::Resolved(id.clone()))?;
        // The Enqueued record and this Resolved record are both dead now.
        state.dead_records += 2;
        state.maybe_compact(self.compact_threshold);
        Ok(true)
    }

    /// Records a failed attempt for `id` and schedules the next one.
    ///
    /// Once `retry.max_attempts` failures accumulate the entry is moved to
    /// the dead-letter set.
    pub fn record_failure(
        &self,
        id: &MutationId,
        error: &str,
        retry: &RetryConfig,
        now: Instant,
    ) -> OutboxResult<FailureDisposition> {
        let attempts = {
            let mut state = self.state.lock();
            let Some(pos) = state.position(id) else {
                return Ok(FailureDisposition::NotQueued);
            };
            let entry = &mut state.entries[pos];
            entry.delivery.attempts = entry.delivery.attempts.saturating_add(1);
            entry.delivery.last_error = Some(error.to_string());

            let attempts = entry.delivery.attempts;
            if !retry.is_exhausted(attempts) {
                let next_attempt_at = now + retry.delay_for_attempt(attempts);
                entry.delivery.next_attempt_at = Some(next_attempt_at);
                return Ok(FailureDisposition::Retry {
                    attempts,
                    next_attempt_at,
                });
            }
            attempts
        };

        self.dead_letter(
            id,
            DeadLetterReason::AttemptsExhausted {
                attempts,
                last_error: error.to_string(),
            },
        )?;
        Ok(FailureDisposition::DeadLettered { attempts })
    }

    /// Moves `id` from the queue to the dead-letter set.
    ///
    /// Returns false if it was not pending.
    pub fn dead_letter(&self, id: &MutationId, reason: DeadLetterReason) -> OutboxResult<bool> {
        let mut state = self.state.lock();
        let Some(pos) = state.position(id) else {
            return Ok(false);
        };

        let dead = DeadLetter {
            mutation: PendingMutation::clone(&state.entries[pos].mutation),
            reason,
            dead_lettered_at_ms: unix_millis(),
        };
        state.log(&JournalRecord::DeadLettered(dead.clone()))?;

        tracing::warn!(mutation_id = %id, reason = %dead.reason, "dead-lettered mutation");
        state.entries.remove(pos);
        state.dead_letters.push(dead);
        // The original Enqueued record is superseded.
        state.dead_records += 1;
        state.maybe_compact(self.compact_threshold);
        Ok(true)
    }

    /// Returns the dead-letter set, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().dead_letters.clone()
    }

    /// Number of dead letters.
    pub fn dead_letter_count(&self) -> usize {
        self.state.lock().dead_letters.len()
    }

    /// Moves a dead letter back to the tail of the queue with fresh retry state.
    pub fn requeue_dead_letter(&self, id: &MutationId) -> OutboxResult<()> {
        let mut state = self.state.lock();
        let pos = state
            .dead_letter_position(id)
            .ok_or_else(|| OutboxError::NotFound(id.clone()))?;

        state.log(&JournalRecord::Requeued(id.clone()))?;
        let dead = state.dead_letters.remove(pos);
        tracing::info!(mutation_id = %id, "requeued dead letter");
        state.entries.push_back(QueuedMutation {
            mutation: Arc::new(dead.mutation),
            delivery: Delivery::default(),
        });
        // DeadLettered and Requeued are superseded by the live entry.
        state.dead_records += 2;
        state.maybe_compact(self.compact_threshold);
        Ok(())
    }

    /// Drops a dead letter for good and returns it.
    pub fn discard_dead_letter(&self, id: &MutationId) -> OutboxResult<DeadLetter> {
        let mut state = self.state.lock();
        let pos = state
            .dead_letter_position(id)
            .ok_or_else(|| OutboxError::NotFound(id.clone()))?;

        state.log(&JournalRecord::Discarded(id.clone()))?;
        let dead = state.dead_letters.remove(pos);
        tracing::info!(mutation_id = %id, "discarded dead letter");
        state.dead_records += 2;
        state.maybe_compact(self.compact_threshold);
        Ok(dead)
    }

    /// Earliest scheduled retry strictly after `after`.
    ///
    /// Entries already due are skipped: they are either picked up by the
    /// next pass or held back behind an earlier entry for the same resource.
    pub fn next_retry_at(&self, after: Instant) -> Option<Instant> {
        self.state
            .lock()
            .entries
            .iter()
            .filter_map(|e| e.delivery.next_attempt_at)
            .filter(|at| *at > after)
            .min()
    }

    /// Rewrites the journal so it holds only live records.
    pub fn compact(&self) -> OutboxResult<()> {
        self.state.lock().compact()
    }
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MutationQueue")
            .field("pending", &state.entries.len())
            .field("dead_letters", &state.dead_letters.len())
            .field("durable", &state.journal.is_some())
            .finish()
    }
}
