//! Pairing lifecycle state machine.
//!
//! Pure transitions only. The pairing manager in clip-client interprets the
//! returned actions (relay calls, persistence, background tasks) in order.

use clip_types::{DeviceId, PairingId};

/// The other device of a pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterpart {
    /// Its device id.
    pub device_id: DeviceId,
    /// Its display name.
    pub display_name: String,
}

/// Pairing state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    /// No pairing, nothing in progress.
    Unpaired,
    /// Host is showing a code and polling for the joiner.
    AwaitingPairing {
        /// Lower bound (ms since epoch) for records that count.
        since_ms: u64,
    },
    /// Paired with a counterpart.
    Paired {
        /// Relay id of the pairing record.
        pairing_id: PairingId,
        /// The other device.
        counterpart: Counterpart,
    },
}

/// Why a pairing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpairReason {
    /// This device asked to unpair.
    Local,
    /// The record disappeared from the relay.
    RemoteRemoved,
}

/// Events surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingNotice {
    /// Pairing established (or restored on startup).
    Paired {
        /// Relay id of the pairing record.
        pairing_id: PairingId,
        /// The other device.
        counterpart: Counterpart,
    },
    /// Pairing ended.
    Unpaired {
        /// Why.
        reason: UnpairReason,
    },
    /// Host stopped waiting for a joiner.
    HostingCancelled,
}

/// Inputs to the pairing state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// Host starts showing a code.
    HostingRequested {
        /// Lower bound (ms since epoch) for records that count.
        since_ms: u64,
    },
    /// Host saw and persisted a pairing record naming it.
    PairingObserved {
        /// Relay id of the record.
        pairing_id: PairingId,
        /// The joiner.
        counterpart: Counterpart,
    },
    /// Joiner created and persisted the pairing record.
    JoinCompleted {
        /// Relay id of the record.
        pairing_id: PairingId,
        /// The host.
        counterpart: Counterpart,
    },
    /// A persisted pairing was loaded at startup.
    Restored {
        /// Relay id of the record.
        pairing_id: PairingId,
        /// The other device.
        counterpart: Counterpart,
    },
    /// Host gave up waiting.
    HostingCancelled,
    /// Status monitor saw the record vanish.
    RemoteRemoved,
    /// User asked to unpair.
    UnpairRequested,
}

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingAction {
    /// Start polling for a record naming this host.
    WatchForPairing {
        /// Lower bound (ms since epoch).
        since_ms: u64,
    },
    /// Stop the pairing watch.
    StopWatching,
    /// Start polling whether the record still exists.
    StartStatusMonitor {
        /// Record to monitor.
        pairing_id: PairingId,
    },
    /// Stop the status monitor.
    StopStatusMonitor,
    /// Delete the record on the relay (best-effort).
    DeleteRemote {
        /// Record to delete.
        pairing_id: PairingId,
    },
    /// Forget pairing id, counterpart and shared secret locally.
    ClearLocal,
    /// Tell the application.
    Notify(PairingNotice),
}

impl PairingState {
    /// Create a new state machine in the Unpaired state.
    pub fn new() -> Self {
        Self::Unpaired
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: PairingEvent) -> (Self, Vec<PairingAction>) {
        match (self, event) {
            // Hosting
            (Self::Unpaired, PairingEvent::HostingRequested { since_ms }) => (
                Self::AwaitingPairing { since_ms },
                vec![PairingAction::WatchForPairing { since_ms }],
            ),
            (Self::AwaitingPairing { .. }, PairingEvent::HostingRequested { since_ms }) => (
                Self::AwaitingPairing { since_ms },
                vec![
                    PairingAction::StopWatching,
                    PairingAction::WatchForPairing { since_ms },
                ],
            ),
            (
                Self::AwaitingPairing { .. },
                PairingEvent::PairingObserved {
                    pairing_id,
                    counterpart,
                },
            ) => paired(pairing_id, counterpart, vec![PairingAction::StopWatching]),
            (Self::AwaitingPairing { .. }, PairingEvent::HostingCancelled) => (
                Self::Unpaired,
                vec![
                    PairingAction::StopWatching,
                    PairingAction::Notify(PairingNotice::HostingCancelled),
                ],
            ),

            // Joining
            (
                Self::Unpaired,
                PairingEvent::JoinCompleted {
                    pairing_id,
                    counterpart,
                },
            ) => paired(pairing_id, counterpart, vec![]),
            (
                Self::AwaitingPairing { .. },
                PairingEvent::JoinCompleted {
                    pairing_id,
                    counterpart,
                },
            ) => paired(pairing_id, counterpart, vec![PairingAction::StopWatching]),

            // Startup
            (
                Self::Unpaired,
                PairingEvent::Restored {
                    pairing_id,
                    counterpart,
                },
            ) => paired(pairing_id, counterpart, vec![]),

            // Teardown
            (Self::Paired { .. }, PairingEvent::RemoteRemoved) => (
                Self::Unpaired,
                vec![
                    PairingAction::StopStatusMonitor,
                    PairingAction::ClearLocal,
                    PairingAction::Notify(PairingNotice::Unpaired {
                        reason: UnpairReason::RemoteRemoved,
                    }),
                ],
            ),
            (Self::Paired { pairing_id, .. }, PairingEvent::UnpairRequested) => (
                Self::Unpaired,
                vec![
                    PairingAction::StopStatusMonitor,
                    PairingAction::DeleteRemote { pairing_id },
                    PairingAction::ClearLocal,
                    PairingAction::Notify(PairingNotice::Unpaired {
                        reason: UnpairReason::Local,
                    }),
                ],
            ),
            (Self::AwaitingPairing { .. }, PairingEvent::UnpairRequested) => (
                Self::Unpaired,
                vec![
                    PairingAction::StopWatching,
                    PairingAction::ClearLocal,
                    PairingAction::Notify(PairingNotice::Unpaired {
                        reason: UnpairReason::Local,
                    }),
                ],
            ),
            // Local cleanup is unconditional, even with nothing to tear down.
            (Self::Unpaired, PairingEvent::UnpairRequested) => {
                (Self::Unpaired, vec![PairingAction::ClearLocal])
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently paired.
    pub fn is_paired(&self) -> bool {
        matches!(self, Self::Paired { .. })
    }

    /// Check if a host is waiting for a joiner.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingPairing { .. })
    }

    /// The current pairing id, if paired.
    pub fn pairing_id(&self) -> Option<&PairingId> {
        match self {
            Self::Paired { pairing_id, .. } => Some(pairing_id),
            _ => None,
        }
    }
}

impl Default for PairingState {
    fn default() -> Self {
        Self::new()
    }
}

fn paired(
    pairing_id: PairingId,
    counterpart: Counterpart,
    mut actions: Vec<PairingAction>,
) -> (PairingState, Vec<PairingAction>) {
    actions.push(PairingAction::StartStatusMonitor {
        pairing_id: pairing_id.clone(),
    });
    actions.push(PairingAction::Notify(PairingNotice::Paired {
        pairing_id: pairing_id.clone(),
        counterpart: counterpart.clone(),
    }));
    (
        PairingState::Paired {
            pairing_id,
            counterpart,
        },
        actions,
    )
}
