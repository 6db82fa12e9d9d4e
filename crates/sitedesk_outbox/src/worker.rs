//! Background drain task.
//!
//! The worker runs one drain pass per wake-up. It wakes on an explicit
//! signal (enqueue, connectivity restored), on the periodic fallback
//! interval, and when the earliest scheduled retry becomes due.

use crate::connectivity::ConnectivityMonitor;
use crate::engine::SyncEngine;
use crate::queue::MutationQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Loop state of the background drain task.
pub(crate) struct SyncWorker {
    engine: Arc<SyncEngine>,
    queue: Arc<MutationQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    wake: Arc<Notify>,
    poll_interval: Duration,
}

impl SyncWorker {
    pub(crate) fn new(
        engine: Arc<SyncEngine>,
        queue: Arc<MutationQueue>,
        connectivity: Arc<ConnectivityMonitor>,
        wake: Arc<Notify>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            engine,
            queue,
            connectivity,
            wake,
            poll_interval,
        }
    }

    /// Spawns the loop on the current tokio runtime.
    pub(crate) fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "sync worker started"
        );

        let mut interval =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.engine.drain().await;

            let retry_at = if self.connectivity.is_offline() {
                None
            } else {
                self.queue
                    .next_retry_at(Instant::now().into_std())
                    .map(Instant::from_std)
            };
            let backoff = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = self.wake.notified() => {
                    tracing::debug!("sync worker woken");
                }
                _ = interval.tick() => {
                    tracing::trace!("sync worker poll");
                }
                () = backoff => {
                    tracing::debug!("retry backoff elapsed");
                }
            }
        }

        tracing::info!("sync worker stopped");
    }
}

/// Handle to a running worker.
///
/// Dropping the handle without calling [`WorkerHandle::shutdown`] also
/// stops the worker at its next wake-up.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops the worker and waits for it to exit.
    ///
    /// A drain pass in progress finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "sync worker task failed");
        }
    }

    /// Returns true if the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
