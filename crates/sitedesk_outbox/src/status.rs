//! Sync state and the status published to the UI.

use crate::connectivity::Connectivity;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Derived state of reconciliation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No drain running; the last pass left nothing behind.
    #[default]
    Idle,
    /// A drain pass is running.
    Syncing,
    /// The last pass applied some entries but left others queued.
    PartiallySynced,
    /// The last pass applied nothing.
    Failed,
}

impl SyncState {
    /// Returns true while a drain pass is running.
    #[must_use]
    pub fn is_syncing(self) -> bool {
        self == SyncState::Syncing
    }

    /// Returns true if the last pass left failures behind.
    #[must_use]
    pub fn has_failures(self) -> bool {
        matches!(self, SyncState::PartiallySynced | SyncState::Failed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::PartiallySynced => "partially_synced",
            SyncState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of the outbox for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// Number of queued mutations.
    pub pending_count: usize,
    /// Human-readable summary.
    pub status_label: String,
    /// True while a drain pass is running.
    pub is_syncing: bool,
    /// Current sync state.
    pub state: SyncState,
    /// Number of dead letters awaiting an operator.
    pub dead_letter_count: usize,
    /// Current connectivity.
    pub connectivity: Connectivity,
}

impl SyncStatus {
    /// Builds a status with its label derived from the other fields.
    pub fn new(
        pending_count: usize,
        state: SyncState,
        dead_letter_count: usize,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            pending_count,
            status_label: status_label(pending_count, state),
            is_syncing: state.is_syncing(),
            state,
            dead_letter_count,
            connectivity,
        }
    }
}

/// Renders the label shown next to the pending count.
pub fn status_label(pending: usize, state: SyncState) -> String {
    if state.is_syncing() {
        format!("Syncing {pending} changes")
    } else if pending == 0 {
        "All changes synced".to_string()
    } else if state.has_failures() {
        format!("Sync failed: {pending} changes pending")
    } else {
        format!("{pending} changes pending")
    }
}

/// Publishes [`SyncStatus`] updates on a watch channel.
#[derive(Debug)]
pub struct StatusReporter {
    tx: watch::Sender<SyncStatus>,
}

impl StatusReporter {
    /// Creates a reporter with an initial status.
    pub fn new(initial: SyncStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Returns the latest status.
    pub fn current(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Publishes `status`; subscribers are woken only if it differs.
    pub fn publish(&self, status: SyncStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                tracing::debug!(
                    pending = status.pending_count,
                    label = %status.status_label,
                    "sync status changed"
                );
                *current = status;
                true
            }
        });
    }

    /// Subscribes to status updates.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(status_label(0, SyncState::Idle), "All changes synced");
        assert_eq!(status_label(1, SyncState::Idle), "1 changes pending");
        assert_eq!(status_label(3, SyncState::Syncing), "Syncing 3 changes");
        assert_eq!(
            status_label(1, SyncState::PartiallySynced),
            "Sync failed: 1 changes pending"
        );
        assert_eq!(
            status_label(2, SyncState::Failed),
            "Sync failed: 2 changes pending"
        );
        assert_eq!(status_label(0, SyncState::Failed), "All changes synced");
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = SyncStatus::new(2, SyncState::Idle, 1, Connectivity::Offline);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["pendingCount"], 2);
        assert_eq!(json["statusLabel"], "2 changes pending");
        assert_eq!(json["isSyncing"], false);
        assert_eq!(json["deadLetterCount"], 1);
        assert_eq!(json["connectivity"], "offline");
        assert_eq!(json["state"], "idle");
    }

    #[tokio::test]
    async fn reporter_skips_identical_updates() {
        let reporter = StatusReporter::new(SyncStatus::new(
            0,
            SyncState::Idle,
            0,
            Connectivity::Online,
        ));
        let mut rx = reporter.subscribe();

        reporter.publish(SyncStatus::new(0, SyncState::Idle, 0, Connectivity::Online));
        assert!(!rx.has_changed().unwrap());

        reporter.publish(SyncStatus::new(1, SyncState::Idle, 0, Connectivity::Online));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().pending_count, 1);
        assert_eq!(reporter.current().status_label, "1 changes pending");
    }
}
