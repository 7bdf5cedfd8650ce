//! # clip-client
//!
//! Client library for duoclip end-to-end encrypted clipboard sync.
//!
//! Two devices pair once by QR code and then mirror each other's text
//! clipboard through a relay that only ever stores ciphertext.
//!
//! ## Features
//!
//! - **E2E Encryption**: AES-256-GCM with a fresh 96-bit nonce per item
//! - **Pairing**: host/joiner handshake with remote-unpair detection
//! - **Echo Suppression**: applied items are never uploaded back
//! - **Transport Abstraction**: HTTP relay or in-memory mock
//! - **Pure State Machines**: Uses clip-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use duoclip_client::{ClientConfig, ClipSync, FileStore, HttpTransport};
//!
//! let config = ClientConfig::from_file(path)?;
//! let transport = HttpTransport::new(&config.relay.url, config.request_timeout())?;
//! let sync = ClipSync::open(config, Arc::new(FileStore::new(dir)), Arc::new(transport), sink).await?;
//!
//! // Joiner side
//! sync.join(&scanned_code).await?;
//!
//! // Forward local clipboard changes
//! sync.notify_local_change("copied text").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod identity;
pub mod pairing;
pub mod relay;
pub mod store;
mod task;
pub mod transport;

pub use app::ClipSync;
pub use config::{ClientConfig, ConfigError, EngineConfig, PairingConfig, PollingConfig, RelayConfig};
pub use crypto::{CryptoError, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use engine::{
    ClipboardSink, EngineHealth, OutboundOutcome, StatsSnapshot, SyncEngine, SyncNotice,
};
pub use error::ClientError;
pub use pairing::{
    ActivePairing, JoinOutcome, PairingHandle, PairingInvite, PairingManager, PAIRING_LOOKBACK_MS,
};
pub use relay::{Heartbeat, PollOptions, RelayClient, Subscription};
pub use store::{FileStore, LocalState, MemoryStore, StateCell, StateStore, StoreError, StoredPairing};
pub use transport::{Endpoint, HttpTransport, MockRelay, RelayTransport, TransportError};

/// Wall-clock time in ms since the epoch.
pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
