//! Online/offline signal.
//!
//! The host pushes transitions in; nothing here polls. Only the
//! offline-to-online edge triggers reconciliation.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Whether the server is believed reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// Requests may be issued.
    Online,
    /// Requests are not attempted.
    Offline,
}

impl Connectivity {
    /// Returns true for [`Connectivity::Online`].
    #[must_use]
    pub fn is_online(self) -> bool {
        self == Connectivity::Online
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

/// An edge in the connectivity signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Offline to online.
    Restored,
    /// Online to offline.
    Lost,
}

/// Holds the current connectivity and broadcasts changes.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<Connectivity>,
}

impl ConnectivityMonitor {
    /// Creates a monitor starting in `initial`.
    pub fn new(initial: Connectivity) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Returns the current state.
    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    /// Returns true if currently offline.
    pub fn is_offline(&self) -> bool {
        self.current() == Connectivity::Offline
    }

    /// Records a new state and returns the edge it caused, if any.
    ///
    /// Repeating the current state is a no-op and returns `None`.
    pub fn set(&self, state: Connectivity) -> Option<Transition> {
        let mut previous = state;
        self.tx.send_if_modified(|current| {
            previous = *current;
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        let transition = match (previous, state) {
            (Connectivity::Offline, Connectivity::Online) => Some(Transition::Restored),
            (Connectivity::Online, Connectivity::Offline) => Some(Transition::Lost),
            _ => None,
        };
        if let Some(t) = transition {
            tracing::info!(connectivity = %state, transition = ?t, "connectivity changed");
        }
        transition
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}
