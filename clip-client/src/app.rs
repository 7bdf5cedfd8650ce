//! ClipSync - one device: identity, pairing manager and sync engine wired together.
//!
//! A bridge task turns pairing notices into engine lifecycle calls: the
//! engine starts once a pairing is established (or restored) and stops,
//! dropping its history, when the pairing ends.

use crate::config::ClientConfig;
use crate::engine::{
    ClipboardSink, EngineHealth, OutboundOutcome, StatsSnapshot, SyncEngine, SyncNotice,
};
use crate::error::ClientError;
use crate::identity;
use crate::pairing::{ActivePairing, JoinOutcome, PairingHandle, PairingInvite, PairingManager};
use crate::relay::RelayClient;
use crate::store::{StateCell, StateStore};
use crate::task::BackgroundTask;
use crate::transport::RelayTransport;
use clip_core::{EngineState, HistoryEntry, PairingNotice, PairingState};
use clip_types::DeviceIdentity;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// A duoclip client instance.
///
/// # Example
///
/// ```ignore
/// use duoclip_client::{ClientConfig, ClipSync, FileStore, HttpTransport};
///
/// let config = ClientConfig::from_file(path)?;
/// let transport = HttpTransport::new(&config.relay.url, config.request_timeout())?;
/// let store = FileStore::new(data_dir);
/// let sync = ClipSync::open(config, Arc::new(store), Arc::new(transport), sink).await?;
///
/// let invite = sync.start_hosting().await?;
/// show_qr(&invite.qr_text);
/// ```
pub struct ClipSync {
    cell: StateCell,
    pairing: PairingManager,
    engine: SyncEngine,
    bridge: BackgroundTask,
}

impl ClipSync {
    /// Load (or create) the identity, restore any persisted pairing and
    /// start syncing if paired.
    pub async fn open(
        config: ClientConfig,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn RelayTransport>,
        sink: Arc<dyn ClipboardSink>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let cell = StateCell::new(store);
        let identity = identity::load_or_create(&cell, &config.pairing.device_name).await?;
        let stats = cell.load().await?.stats;

        let relay = RelayClient::new(transport);
        let pairing = PairingManager::new(
            relay.clone(),
            cell.clone(),
            config.clone(),
            identity.clone(),
        );
        let engine = SyncEngine::new(
            relay,
            cell.clone(),
            config,
            identity.clone(),
            pairing.handle(),
            sink,
            stats,
        );

        // Subscribe before restoring so the restored pairing starts the engine.
        let bridge = spawn_bridge(pairing.subscribe(), pairing.handle(), engine.clone());
        let paired = pairing.restore().await?;
        tracing::info!(
            "duoclip ready as {} ({})",
            identity.display_name,
            if paired { "paired" } else { "unpaired" }
        );

        Ok(Self {
            cell,
            pairing,
            engine,
            bridge,
        })
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// This device's identity.
    pub fn identity(&self) -> DeviceIdentity {
        self.pairing.identity()
    }

    /// Change the display name. Takes effect for new pairings and history.
    pub async fn rename(&self, display_name: &str) -> Result<DeviceIdentity, ClientError> {
        let identity = identity::rename(&self.cell, display_name).await?;
        self.pairing.set_identity(identity.clone());
        self.engine.set_identity(identity.clone());
        Ok(identity)
    }

    // =========================================================================
    // Pairing
    // =========================================================================

    /// Show a pairing code and wait for a joiner.
    pub async fn start_hosting(&self) -> Result<PairingInvite, ClientError> {
        self.pairing.start_hosting().await
    }

    /// Stop waiting for a joiner.
    pub async fn cancel_hosting(&self) {
        self.pairing.cancel_hosting().await
    }

    /// Join the host whose code was scanned.
    pub async fn join(&self, code: &str) -> Result<JoinOutcome, ClientError> {
        self.pairing.join(code).await
    }

    /// Unpair, stop syncing and forget history. Returns warnings for
    /// best-effort steps that failed.
    pub async fn unpair(&self) -> Vec<String> {
        let warnings = self.pairing.unpair().await;
        self.engine.stop().await;
        self.engine.clear_history();
        warnings
    }

    /// Pairing state.
    pub async fn pairing_state(&self) -> PairingState {
        self.pairing.state().await
    }

    /// Whether a pairing is established.
    pub async fn is_paired(&self) -> bool {
        self.pairing.is_paired().await
    }

    /// The current pairing, if any.
    pub fn active_pairing(&self) -> Option<ActivePairing> {
        self.pairing.active()
    }

    /// Subscribe to pairing notices.
    pub fn pairing_notices(&self) -> broadcast::Receiver<PairingNotice> {
        self.pairing.subscribe()
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Upload a local clipboard change.
    pub async fn notify_local_change(&self, text: &str) -> Result<OutboundOutcome, ClientError> {
        self.engine.notify_local_change(text).await
    }

    /// Start syncing (normally done automatically once paired).
    pub async fn start_sync(&self) -> Result<(), ClientError> {
        self.engine.start().await
    }

    /// Pause syncing.
    pub async fn pause(&self) {
        self.engine.pause().await
    }

    /// Resume syncing.
    pub async fn resume(&self) {
        self.engine.resume().await
    }

    /// Re-read the relay now.
    pub async fn pull_now(&self) -> bool {
        self.engine.pull_now().await
    }

    /// Delete this pairing's rows on the relay.
    pub async fn clear_remote_history(&self) -> Result<u64, ClientError> {
        self.engine.clear_remote_history().await
    }

    /// Recent items, newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.engine.history()
    }

    /// Counters and streak.
    pub fn stats(&self) -> StatsSnapshot {
        self.engine.stats()
    }

    /// Engine health counters.
    pub async fn health(&self) -> EngineHealth {
        self.engine.health().await
    }

    /// Engine lifecycle state.
    pub async fn sync_state(&self) -> EngineState {
        self.engine.state().await
    }

    /// Subscribe to engine notices.
    pub fn sync_notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.engine.subscribe()
    }

    /// Stop syncing and cancel every background task.
    pub async fn shutdown(&self) {
        self.bridge.cancel();
        self.engine.stop().await;
        self.engine.shutdown();
        self.pairing.shutdown();
        tracing::info!("duoclip shut down");
    }
}

impl std::fmt::Debug for ClipSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipSync")
            .field("pairing", &self.pairing)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

fn spawn_bridge(
    mut notices: broadcast::Receiver<PairingNotice>,
    pairing: PairingHandle,
    engine: SyncEngine,
) -> BackgroundTask {
    BackgroundTask::spawn(move |token| async move {
        loop {
            let notice = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                notice = notices.recv() => notice,
            };
            match notice {
                Ok(PairingNotice::Paired { pairing_id, .. }) => {
                    // Fresh ledger for every pairing
                    engine.stop().await;
                    if let Err(e) = engine.start().await {
                        tracing::warn!("Sync not started for pairing {}: {}", pairing_id, e);
                    }
                }
                Ok(PairingNotice::Unpaired { reason }) => {
                    engine.stop().await;
                    engine.clear_history();
                    tracing::info!("Sync stopped: unpaired ({:?})", reason);
                }
                Ok(PairingNotice::HostingCancelled) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} pairing notices; resynchronizing", missed);
                    if pairing.current().is_some() {
                        if let Err(e) = engine.start().await {
                            tracing::warn!("Sync not started: {}", e);
                        }
                    } else {
                        engine.stop().await;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Pairing bridge stopped");
    })
}
