//! Error types for the duoclip client.

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::store::StoreError;
use crate::transport::TransportError;
use clip_core::PairingError;
use thiserror::Error;

/// Errors surfaced by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Relay call failed (network, HTTP, timeout, rejection, bad response).
    #[error("relay error: {0}")]
    Transport(#[from] TransportError),

    /// Encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A scanned pairing code is unusable.
    #[error("invalid pairing code: {0}")]
    InvalidPairingCode(#[source] PairingError),

    /// Pairing state is inconsistent (e.g. stored secret unreadable).
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Local state could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The operation needs an active pairing.
    #[error("not paired")]
    NotPaired,

    /// Hosting needs the current pairing to be removed first.
    #[error("already paired; unpair before hosting a new pairing")]
    AlreadyPaired,
}

impl ClientError {
    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transport(e) if e.is_transient())
    }
}
