//! # clip-types
//!
//! Wire format types for duoclip clipboard sync.
//!
//! This crate provides the foundational types used across all duoclip crates:
//! - [`DeviceId`], [`PairingId`], [`ItemId`] - Identity types
//! - [`DeviceIdentity`] - Per-install device identity
//! - [`PairingRecord`], [`ClipboardEnvelope`] - Documents stored by the relay
//! - [`RelayRequest`], [`RelayResponse`] - Relay HTTP envelope
//! - [`functions`] - Relay function names
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub mod functions;
mod ids;
mod records;
mod wire;

pub use error::WireError;
pub use ids::{clamp_display_name, DeviceId, DeviceIdentity, ItemId, PairingId, MAX_DISPLAY_NAME_LEN};
pub use records::{ClipboardEnvelope, ContentKind, PairingRecord, PairingStatus};
pub use wire::{RelayRequest, RelayResponse, ResponseStatus};
