//! # clip-core
//!
//! Pure logic for duoclip (no I/O, instant tests).
//!
//! This crate implements the state machines and sync rules without any
//! network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input (including the
//! current time or calendar day) and produce output without side effects.
//! The actual I/O (relay calls, persistence, clipboard writes) is performed
//! by `clip-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod history;
pub mod ledger;
pub mod pairing;
pub mod pairing_state;
pub mod state;
pub mod watchdog;

pub use history::{Direction, HistoryEntry, SyncHistory, SyncStats};
pub use ledger::{ApplyDecision, InboundDecision, OutboundDecision, SyncLedger};
pub use pairing::{HandshakePayload, PairingError, SecretSource, SharedSecret};
pub use pairing_state::{
    Counterpart, PairingAction, PairingEvent, PairingNotice, PairingState, UnpairReason,
};
pub use state::{EngineAction, EngineEvent, EngineNotice, EngineState};
pub use watchdog::{ListenerWatchdog, WatchdogVerdict};
