//! Local persistence for duoclip.
//!
//! Everything a client must remember across restarts lives in one
//! [`LocalState`] document: device identity, shared secret, relay URL,
//! current pairing and sync statistics.

use async_trait::async_trait;
use clip_core::{PairingError, SharedSecret, SyncStats};
use clip_types::{DeviceId, DeviceIdentity, PairingId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Stored data could not be decoded.
    #[error("stored state is corrupt: {0}")]
    Corrupt(String),

    /// The store refused the write.
    #[error("storage write failed: {0}")]
    WriteFailed(String),
}

/// The pairing this device currently belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPairing {
    /// Relay id of the pairing record.
    pub pairing_id: PairingId,
    /// The other device.
    pub counterpart_id: DeviceId,
    /// Its display name.
    pub counterpart_name: String,
    /// When the pairing was established (ms since epoch).
    pub paired_at_ms: u64,
}

/// Everything persisted by a client.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LocalState {
    /// This install's identity.
    #[serde(default)]
    pub identity: Option<DeviceIdentity>,
    /// Shared secret, uppercase hex.
    #[serde(default)]
    pub shared_secret: Option<String>,
    /// Relay learned from a pairing payload.
    #[serde(default)]
    pub relay_url: Option<String>,
    /// Current pairing.
    #[serde(default)]
    pub pairing: Option<StoredPairing>,
    /// Sync counters.
    #[serde(default)]
    pub stats: SyncStats,
}

impl LocalState {
    /// Decode the stored secret.
    pub fn secret(&self) -> Result<Option<SharedSecret>, PairingError> {
        self.shared_secret
            .as_deref()
            .map(SharedSecret::from_hex)
            .transpose()
    }

    /// Store a secret.
    pub fn set_secret(&mut self, secret: &SharedSecret) {
        self.shared_secret = Some(secret.to_hex());
    }

    /// Forget pairing and secret. Identity, relay URL and stats stay.
    pub fn clear_pairing(&mut self) {
        self.pairing = None;
        if let Some(mut hex) = self.shared_secret.take() {
            zeroize::Zeroize::zeroize(&mut hex);
        }
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for LocalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalState")
            .field("identity", &self.identity)
            .field(
                "shared_secret",
                &self.shared_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("relay_url", &self.relay_url)
            .field("pairing", &self.pairing)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Backing storage for [`LocalState`].
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state. A store with nothing saved yet returns the default.
    async fn load(&self) -> Result<LocalState, StoreError>;

    /// Replace the stored state.
    async fn save(&self, state: &LocalState) -> Result<(), StoreError>;
}

/// JSON file store with owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store state in `<data_dir>/state.json`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("state.json"),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self) -> Result<LocalState, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StoreError::Corrupt(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalState::default()),
            Err(e) => Err(StoreError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    async fn save(&self, state: &LocalState) -> Result<(), StoreError> {
        let io_err = |path: &Path, source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_err(dir, e))?;
        }

        let contents = serde_json::to_string_pretty(state)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        // Write beside the target, then rename over it
        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, contents.as_bytes())
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

/// Write a fresh file that is owner read/write only (0600) from the moment
/// it exists. Permissions are left to the platform on non-Unix.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    // A leftover from an interrupted save may carry other permissions.
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

/// In-memory store for testing.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    state: LocalState,
    saves: usize,
    fail_next_save: Option<String>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cause the next save() to fail with the given error.
    pub fn fail_next_save(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_save = Some(error.to_string());
    }

    /// Current contents.
    pub fn snapshot(&self) -> LocalState {
        let inner = self.inner.lock().unwrap();
        inner.state.clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.saves
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<LocalState, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.state.clone())
    }

    async fn save(&self, state: &LocalState) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_save.take() {
            return Err(StoreError::WriteFailed(error));
        }

        inner.state = state.clone();
        inner.saves += 1;
        Ok(())
    }
}

/// Serialized read-modify-write access to a [`StateStore`].
///
/// Pairing and sync code both update the same document; every update goes
/// through one lock so neither overwrites the other's fields.
#[derive(Clone)]
pub struct StateCell {
    store: Arc<dyn StateStore>,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl StateCell {
    /// Wrap a store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Load the current state.
    pub async fn load(&self) -> Result<LocalState, StoreError> {
        let _guard = self.lock.lock().await;
        self.store.load().await
    }

    /// Load, apply `f`, save. Returns the saved state.
    ///
    /// Nothing is saved if loading fails; the caller sees the save error
    /// if writing fails.
    pub async fn update<F>(&self, f: F) -> Result<LocalState, StoreError>
    where
        F: FnOnce(&mut LocalState),
    {
        let _guard = self.lock.lock().await;
        let mut state = self.store.load().await?;
        f(&mut state);
        self.store.save(&state).await?;
        Ok(state)
    }
}

impl std::fmt::Debug for StateCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCell").finish_non_exhaustive()
    }
}
