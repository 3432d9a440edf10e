//! Local mirror of the realm state.
//!
//! The hub pushes full snapshots and partial deltas; this store merges them
//! into one [`StoreState`] that readers observe through a `watch` channel.
//!
//! Merge rules:
//! - a snapshot whose revision is lower than the current one is dropped whole;
//! - deltas only apply on top of an accepted snapshot and never move the
//!   revision;
//! - while a full resync is outstanding, deltas are dropped, since the snapshot
//!   that answers the resync supersedes them. Any snapshot ends the wait, even
//!   a stale one.

use std::sync::Arc;

use realmsync_shared::{ConnectionError, DeltaEvent, Encounter, PartyMember, Snapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{log_debug, log_info, log_warn};

/// Connection status as presented to readers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// Whether interactive controls should be enabled
    pub fn is_interactive(&self) -> bool {
        self.is_connected()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub snapshot: Option<Snapshot>,
    pub presence: Vec<PartyMember>,
    pub encounter: Option<Encounter>,
    pub revision: Option<u64>,
    pub connection_status: ConnectionStatus,
    pub last_error: Option<ConnectionError>,
    /// A full snapshot has been requested and not yet received
    pub resync_pending: bool,
}

impl StoreState {
    pub fn has_baseline(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// What happened to an incoming update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Snapshot older than what is already held
    Stale { current: u64, incoming: u64 },
    /// Delta arrived before any snapshot
    NoBaseline,
    /// Delta arrived while a full resync was outstanding
    AwaitingResync,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

/// Shared handle to the state cell. Cloning shares the same cell.
#[derive(Debug, Clone)]
pub struct StateStore {
    cell: Arc<watch::Sender<StoreState>>,
}

impl StateStore {
    pub fn new() -> Self {
        let (cell, _) = watch::channel(StoreState::default());
        Self {
            cell: Arc::new(cell),
        }
    }

    /// Current state (cloned)
    pub fn state(&self) -> StoreState {
        self.cell.borrow().clone()
    }

    /// Reactive read handle; `changed()` fires on every accepted update
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.cell.subscribe()
    }

    pub fn revision(&self) -> Option<u64> {
        self.cell.borrow().revision
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.cell.borrow().connection_status
    }

    /// Replace the mirrored state with `snapshot` unless it is older than
    /// the current revision.
    ///
    /// A snapshot without a revision is accepted but leaves the current
    /// revision in place, so the revision never moves backwards.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::Applied;
        let mut ended_resync = false;
        self.cell.send_if_modified(|state| {
            if let (Some(current), Some(incoming)) = (state.revision, snapshot.revision) {
                if incoming < current {
                    outcome = ApplyOutcome::Stale { current, incoming };
                    ended_resync = std::mem::take(&mut state.resync_pending);
                    return ended_resync;
                }
            }
            state.revision = snapshot.revision.or(state.revision);
            state.presence = snapshot.party_roster.clone();
            state.encounter = snapshot.encounter.clone();
            state.snapshot = Some(snapshot);
            state.resync_pending = false;
            true
        });

        match outcome {
            ApplyOutcome::Stale { current, incoming } => {
                log_info!("discarding stale snapshot r{} (holding r{})", incoming, current);
                if ended_resync {
                    log_warn!("resync answered with a stale snapshot; accepting deltas again");
                }
            }
            _ => log_debug!("applied snapshot, revision now {:?}", self.revision()),
        }
        outcome
    }

    /// Merge a delta. Full-state deltas are routed through
    /// [`apply_snapshot`](Self::apply_snapshot).
    pub fn apply_event(&self, event: DeltaEvent) -> ApplyOutcome {
        let kind = event.kind();
        let outcome = match event {
            DeltaEvent::StateUpdated(snapshot) => return self.apply_snapshot(snapshot),
            DeltaEvent::PresenceUpdated(presence) => {
                self.apply_delta(move |state| state.presence = presence)
            }
            DeltaEvent::EncounterUpdated(encounter) => {
                self.apply_delta(move |state| state.encounter = encounter)
            }
        };
        if !outcome.is_applied() {
            log_debug!("discarding {} delta: {:?}", kind, outcome);
        }
        outcome
    }

    fn apply_delta(&self, merge: impl FnOnce(&mut StoreState)) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::Applied;
        self.cell.send_if_modified(|state| {
            if !state.has_baseline() {
                outcome = ApplyOutcome::NoBaseline;
                return false;
            }
            if state.resync_pending {
                outcome = ApplyOutcome::AwaitingResync;
                return false;
            }
            merge(state);
            true
        });
        outcome
    }

    /// Mark a full resync as outstanding; deltas are held off until the next
    /// accepted snapshot.
    pub fn begin_resync(&self) {
        self.cell.send_if_modified(|state| {
            let changed = !state.resync_pending;
            state.resync_pending = true;
            changed
        });
    }

    /// Give up waiting for a resync, e.g. when the request itself failed
    pub fn cancel_resync(&self) {
        self.cell.send_if_modified(|state| {
            let changed = state.resync_pending;
            state.resync_pending = false;
            changed
        });
    }

    pub fn set_connection_status(&self, status: ConnectionStatus) {
        self.cell.send_if_modified(|state| {
            let changed = state.connection_status != status;
            state.connection_status = status;
            changed
        });
    }

    pub fn set_last_error(&self, error: Option<ConnectionError>) {
        self.cell.send_if_modified(|state| {
            let changed = state.last_error != error;
            state.last_error = error;
            changed
        });
    }

    /// Reset every field, e.g. on logout or session switch
    pub fn clear(&self) {
        self.cell.send_replace(StoreState::default());
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
