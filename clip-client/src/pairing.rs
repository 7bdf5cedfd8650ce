//! PairingManager - hosting, joining, status monitoring and unpairing.
//!
//! The manager feeds events into the pure [`PairingState`] machine from
//! clip-core and executes the returned actions in order: relay calls,
//! persistence, and the two background tasks (the host's pairing watch and
//! the paired status monitor).
//!
//! ```text
//! host:   start_hosting ──► watch pairings ──► persist ──► Paired
//! joiner: join(code) ──► persist secret ──► create record ──► persist ──► Paired
//! both:   status monitor ──► record gone ──► clear local ──► Unpaired
//! ```

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::now_ms;
use crate::relay::{PollOptions, RelayClient};
use crate::store::{LocalState, StateCell, StoreError, StoredPairing};
use crate::task::BackgroundTask;
use clip_core::{
    Counterpart, HandshakePayload, PairingAction, PairingError, PairingEvent, PairingNotice,
    PairingState, SecretSource, SharedSecret,
};
use clip_types::{functions, DeviceIdentity, PairingId, PairingRecord};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// How far back a host accepts pairing records (ms).
pub const PAIRING_LOOKBACK_MS: u64 = 60 * 60 * 1000;

const NOTICE_CAPACITY: usize = 32;

/// The established pairing: record id, counterpart and shared secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePairing {
    /// Relay id of the pairing record.
    pub pairing_id: PairingId,
    /// The other device.
    pub counterpart: Counterpart,
    /// Shared secret (AES-256-GCM key).
    pub secret: SharedSecret,
}

/// Shared, read-mostly view of the current pairing.
///
/// The sync engine reads it on every upload and inbound item; only the
/// pairing manager writes it.
#[derive(Debug, Clone, Default)]
pub struct PairingHandle(Arc<RwLock<Option<ActivePairing>>>);

impl PairingHandle {
    /// The current pairing, if any.
    pub fn current(&self) -> Option<ActivePairing> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn set(&self, pairing: ActivePairing) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(pairing);
    }

    fn clear(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// What a host shows the joiner.
#[derive(Clone)]
pub struct PairingInvite {
    /// Decoded payload.
    pub payload: HandshakePayload,
    /// Text to encode as the QR code.
    pub qr_text: String,
}

// qr_text embeds the secret
impl std::fmt::Debug for PairingInvite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingInvite")
            .field("payload", &self.payload)
            .field("qr_text", &"[REDACTED]")
            .finish()
    }
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Relay id of the new pairing record.
    pub pairing_id: PairingId,
    /// The host.
    pub counterpart: Counterpart,
    /// Non-fatal problems (legacy key used, old record not removed).
    pub warnings: Vec<String>,
}

/// Pairing manager.
///
/// Cheap to clone; clones share state. Background tasks only hold weak
/// references and stop once every clone is gone.
#[derive(Clone)]
pub struct PairingManager {
    inner: Arc<Inner>,
}

struct Inner {
    relay: RelayClient,
    cell: StateCell,
    config: ClientConfig,
    identity: RwLock<DeviceIdentity>,
    active: PairingHandle,
    // Held while actions execute, so transitions never interleave.
    state: tokio::sync::Mutex<PairingState>,
    watch: Mutex<Option<BackgroundTask>>,
    monitor: Mutex<Option<BackgroundTask>>,
    notices: broadcast::Sender<PairingNotice>,
}

impl PairingManager {
    /// Create a manager in the Unpaired state. Call [`restore`](Self::restore)
    /// to pick up a persisted pairing.
    pub fn new(
        relay: RelayClient,
        cell: StateCell,
        config: ClientConfig,
        identity: DeviceIdentity,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                relay,
                cell,
                config,
                identity: RwLock::new(identity),
                active: PairingHandle::default(),
                state: tokio::sync::Mutex::new(PairingState::new()),
                watch: Mutex::new(None),
                monitor: Mutex::new(None),
                notices,
            }),
        }
    }

    /// This device's identity.
    pub fn identity(&self) -> DeviceIdentity {
        self.inner
            .identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Use a new identity (after a rename) for future pairings.
    pub fn set_identity(&self, identity: DeviceIdentity) {
        *self.inner.identity.write().unwrap_or_else(|e| e.into_inner()) = identity;
    }

    /// Shared view of the current pairing.
    pub fn handle(&self) -> PairingHandle {
        self.inner.active.clone()
    }

    /// The current pairing, if any.
    pub fn active(&self) -> Option<ActivePairing> {
        self.inner.active.current()
    }

    /// Subscribe to pairing notices.
    pub fn subscribe(&self) -> broadcast::Receiver<PairingNotice> {
        self.inner.notices.subscribe()
    }

    /// Current state.
    pub async fn state(&self) -> PairingState {
        self.inner.state.lock().await.clone()
    }

    /// Whether a pairing is established.
    pub async fn is_paired(&self) -> bool {
        self.inner.state.lock().await.is_paired()
    }

    /// Pick up the persisted pairing, if any.
    ///
    /// Returns whether the device is paired afterwards. A stored pairing
    /// without a usable secret is discarded.
    pub async fn restore(&self) -> Result<bool, ClientError> {
        let local = self.inner.cell.load().await?;
        if let Some(url) = &local.relay_url {
            self.inner.relay.retarget(url);
        }
        let Some(stored) = local.pairing.clone() else {
            return Ok(false);
        };

        let secret = match local.secret() {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                tracing::warn!(
                    "Stored pairing {} has no shared secret; discarding it",
                    stored.pairing_id
                );
                self.inner.cell.update(LocalState::clear_pairing).await?;
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!(
                    "Stored pairing {} has an unreadable secret ({}); discarding it",
                    stored.pairing_id,
                    e
                );
                self.inner.cell.update(LocalState::clear_pairing).await?;
                return Ok(false);
            }
        };

        let counterpart = Counterpart {
            device_id: stored.counterpart_id,
            display_name: stored.counterpart_name,
        };
        let mut state = self.inner.state.lock().await;
        if !matches!(*state, PairingState::Unpaired) {
            return Ok(state.is_paired());
        }
        self.inner.active.set(ActivePairing {
            pairing_id: stored.pairing_id.clone(),
            counterpart: counterpart.clone(),
            secret,
        });
        tracing::info!(
            "Restored pairing {} with {}",
            stored.pairing_id,
            counterpart.display_name
        );
        self.drive_locked(
            &mut state,
            PairingEvent::Restored {
                pairing_id: stored.pairing_id,
                counterpart,
            },
        )
        .await;
        Ok(true)
    }

    /// Start hosting: make sure a secret exists and watch for a joiner.
    ///
    /// Returns the payload to show as a QR code. Fails with
    /// [`ClientError::AlreadyPaired`] while a pairing is active.
    pub async fn start_hosting(&self) -> Result<PairingInvite, ClientError> {
        if self.is_paired().await {
            return Err(ClientError::AlreadyPaired);
        }

        let secret = self.ensure_secret().await?;
        let relay_url = self.relay_url().await?;
        let payload = HandshakePayload::new(&self.identity(), secret, &relay_url);
        let since_ms = now_ms().saturating_sub(PAIRING_LOOKBACK_MS);

        self.drive(PairingEvent::HostingRequested { since_ms }).await;
        tracing::info!("Hosting pairing via {}", relay_url);

        Ok(PairingInvite {
            qr_text: payload.to_qr_payload(),
            payload,
        })
    }

    /// Stop waiting for a joiner.
    pub async fn cancel_hosting(&self) {
        self.drive(PairingEvent::HostingCancelled).await;
    }

    /// Join the host whose pairing code was scanned.
    ///
    /// A pairing this device already has is removed first. Fails without
    /// touching the relay when the code is unusable.
    pub async fn join(&self, code: &str) -> Result<JoinOutcome, ClientError> {
        let payload =
            HandshakePayload::from_qr_payload(code).map_err(ClientError::InvalidPairingCode)?;
        let identity = self.identity();
        if payload.device_id == identity.device_id {
            return Err(ClientError::InvalidPairingCode(
                PairingError::InvalidPayload("code was issued by this device".into()),
            ));
        }

        let legacy = self.inner.config.legacy_secret()?;
        let (secret, source) = payload
            .resolve_secret(legacy.as_ref())
            .map_err(ClientError::InvalidPairingCode)?;

        let mut warnings = Vec::new();
        if source == SecretSource::LegacyDefault {
            tracing::warn!("Pairing code carries no secret; using the deprecated legacy key");
            warnings.push("pairing code carries no secret; used the legacy key".to_string());
        }

        // Supersede whatever this device had before.
        if !matches!(self.state().await, PairingState::Unpaired) {
            warnings.extend(self.drive(PairingEvent::UnpairRequested).await);
        }

        // Nothing is stored until the relay has accepted the pairing.
        let previous_url = self.relay_url().await?;
        if let Some(url) = &payload.relay_url {
            self.inner.relay.retarget(url);
        }

        let args = json!({
            "androidDeviceId": identity.device_id.as_str(),
            "androidDeviceName": identity.display_name,
            "macDeviceId": payload.device_id.as_str(),
            "macDeviceName": payload.device_name,
        });
        let created: Result<String, _> = self
            .inner
            .relay
            .mutate_as(functions::PAIRING_CREATE, args)
            .await;
        let pairing_id = match created {
            Ok(id) => PairingId::new(id),
            Err(e) => {
                self.inner.relay.retarget(&previous_url);
                return Err(e.into());
            }
        };
        let counterpart = Counterpart {
            device_id: payload.device_id.clone(),
            display_name: payload.device_name.clone(),
        };

        let saved = self
            .inner
            .cell
            .update(|s| {
                s.set_secret(&secret);
                if let Some(url) = &payload.relay_url {
                    s.relay_url = Some(url.clone());
                }
                s.pairing = Some(StoredPairing {
                    pairing_id: pairing_id.clone(),
                    counterpart_id: counterpart.device_id.clone(),
                    counterpart_name: counterpart.display_name.clone(),
                    paired_at_ms: now_ms(),
                });
            })
            .await;
        if let Err(e) = saved {
            // Don't leave a record on the relay that this device forgot.
            if let Err(remove) = self
                .inner
                .relay
                .mutate(functions::PAIRING_REMOVE, json!({ "pairingId": pairing_id.as_str() }))
                .await
            {
                tracing::warn!("Could not remove orphaned pairing {}: {}", pairing_id, remove);
            }
            self.inner.relay.retarget(&previous_url);
            return Err(e.into());
        }

        let mut state = self.inner.state.lock().await;
        self.inner.active.set(ActivePairing {
            pairing_id: pairing_id.clone(),
            counterpart: counterpart.clone(),
            secret,
        });
        warnings.extend(
            self.drive_locked(
                &mut state,
                PairingEvent::JoinCompleted {
                    pairing_id: pairing_id.clone(),
                    counterpart: counterpart.clone(),
                },
            )
            .await,
        );
        tracing::info!("Joined {} as pairing {}", counterpart.display_name, pairing_id);

        Ok(JoinOutcome {
            pairing_id,
            counterpart,
            warnings,
        })
    }

    /// Unpair. The relay record is removed best-effort; local state is
    /// always cleared. Returns warnings for steps that failed.
    pub async fn unpair(&self) -> Vec<String> {
        let warnings = self.drive(PairingEvent::UnpairRequested).await;
        tracing::info!("Unpaired");
        warnings
    }

    /// Stop background tasks.
    pub fn shutdown(&self) {
        stop_task(&self.inner.watch);
        stop_task(&self.inner.monitor);
    }

    async fn ensure_secret(&self) -> Result<SharedSecret, ClientError> {
        if let Some(secret) = self.inner.cell.load().await?.secret()? {
            return Ok(secret);
        }
        let fresh = SharedSecret::random()?;
        let saved = self
            .inner
            .cell
            .update(|s| {
                if s.shared_secret.is_none() {
                    s.set_secret(&fresh);
                }
            })
            .await?;
        tracing::info!("Generated new shared secret");
        saved
            .secret()?
            .ok_or_else(|| StoreError::WriteFailed("shared secret was not persisted".into()).into())
    }

    async fn relay_url(&self) -> Result<String, ClientError> {
        let local = self.inner.cell.load().await?;
        Ok(local
            .relay_url
            .unwrap_or_else(|| self.inner.config.relay.url.clone()))
    }

    async fn persist_pairing(
        &self,
        pairing_id: &PairingId,
        counterpart: &Counterpart,
    ) -> Result<LocalState, StoreError> {
        self.inner
            .cell
            .update(|s| {
                s.pairing = Some(StoredPairing {
                    pairing_id: pairing_id.clone(),
                    counterpart_id: counterpart.device_id.clone(),
                    counterpart_name: counterpart.display_name.clone(),
                    paired_at_ms: now_ms(),
                });
            })
            .await
    }

    async fn drive(&self, event: PairingEvent) -> Vec<String> {
        let mut state = self.inner.state.lock().await;
        self.drive_locked(&mut state, event).await
    }

    async fn drive_locked(&self, state: &mut PairingState, event: PairingEvent) -> Vec<String> {
        let (next, actions) = state.clone().on_event(event);
        *state = next;

        let mut warnings = Vec::new();
        for action in actions {
            if let Some(warning) = self.execute(action).await {
                warnings.push(warning);
            }
        }
        warnings
    }

    async fn execute(&self, action: PairingAction) -> Option<String> {
        match action {
            PairingAction::WatchForPairing { since_ms } => self.spawn_watch(since_ms),
            PairingAction::StopWatching => stop_task(&self.inner.watch),
            PairingAction::StartStatusMonitor { pairing_id } => self.spawn_monitor(pairing_id),
            PairingAction::StopStatusMonitor => stop_task(&self.inner.monitor),
            PairingAction::DeleteRemote { pairing_id } => {
                let args = json!({ "pairingId": pairing_id.as_str() });
                if let Err(e) = self.inner.relay.mutate(functions::PAIRING_REMOVE, args).await {
                    tracing::warn!("Could not remove pairing {} from relay: {}", pairing_id, e);
                    return Some(format!("pairing not removed from relay: {}", e));
                }
            }
            PairingAction::ClearLocal => {
                self.inner.active.clear();
                if let Err(e) = self.inner.cell.update(LocalState::clear_pairing).await {
                    tracing::error!("Failed to clear stored pairing: {}", e);
                    return Some(format!("stored pairing not cleared: {}", e));
                }
            }
            PairingAction::Notify(notice) => {
                tracing::debug!("Pairing notice: {:?}", notice);
                // No receivers is fine
                let _ = self.inner.notices.send(notice);
            }
        }
        None
    }

    fn spawn_watch(&self, since_ms: u64) {
        let identity = self.identity();
        let config = &self.inner.config;
        let mut updates = self.inner.relay.poll_subscribe(
            functions::PAIRING_WATCH,
            json!({
                "macDeviceId": identity.device_id.as_str(),
                "sinceTimestamp": since_ms,
            }),
            PollOptions::new(config.pairing_watch_interval())
                .with_error_backoff(config.error_backoff()),
        );
        let weak = Arc::downgrade(&self.inner);

        let task = BackgroundTask::spawn(move |token| async move {
            loop {
                let update = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    update = updates.next() => update,
                };
                let value = match update {
                    None => break,
                    Some(None) => continue,
                    Some(Some(value)) => value,
                };
                let record: PairingRecord = match serde_json::from_value(value) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed pairing record: {}", e);
                        continue;
                    }
                };
                let Some(manager) = upgrade(&weak) else { break };
                if manager.adopt(record, &token).await {
                    break;
                }
            }
            tracing::debug!("Pairing watch stopped");
        });
        replace_task(&self.inner.watch, task);
    }

    /// Host side: persist an observed record, then report Paired.
    ///
    /// Returns true when the watch should end.
    async fn adopt(&self, record: PairingRecord, token: &CancellationToken) -> bool {
        let me = self.identity().device_id;
        let Some((device_id, display_name)) = record
            .counterpart_of(&me)
            .filter(|_| record.device_a_id == me)
            .map(|(id, name)| (id.clone(), name.to_string()))
        else {
            tracing::warn!("Ignoring pairing {} that does not name this host", record.pairing_id);
            return false;
        };
        let counterpart = Counterpart {
            device_id,
            display_name,
        };

        // Never report Paired before the pairing is on disk.
        let saved = loop {
            match self.persist_pairing(&record.pairing_id, &counterpart).await {
                Ok(saved) => break saved,
                Err(e) => {
                    tracing::error!("Failed to persist pairing {}: {}", record.pairing_id, e);
                    tokio::select! {
                        _ = token.cancelled() => return true,
                        _ = tokio::time::sleep(self.inner.config.error_backoff()) => {}
                    }
                }
            }
        };
        let secret = match saved.secret() {
            Ok(Some(secret)) => secret,
            Ok(None) => {
                tracing::error!("Shared secret vanished while hosting; pairing abandoned");
                return true;
            }
            Err(e) => {
                tracing::error!("Stored shared secret is unreadable: {}", e);
                return true;
            }
        };

        let mut state = self.inner.state.lock().await;
        if !state.is_awaiting() {
            // Hosting was cancelled while persisting.
            if let Err(e) = self
                .inner
                .cell
                .update(|s| {
                    if s.pairing.as_ref().map(|p| &p.pairing_id) == Some(&record.pairing_id) {
                        s.pairing = None;
                    }
                })
                .await
            {
                tracing::warn!("Failed to roll back pairing {}: {}", record.pairing_id, e);
            }
            return true;
        }

        tracing::info!(
            "Paired with {} ({})",
            counterpart.display_name,
            record.pairing_id
        );
        self.inner.active.set(ActivePairing {
            pairing_id: record.pairing_id.clone(),
            counterpart: counterpart.clone(),
            secret,
        });
        self.drive_locked(
            &mut state,
            PairingEvent::PairingObserved {
                pairing_id: record.pairing_id,
                counterpart,
            },
        )
        .await;
        true
    }

    fn spawn_monitor(&self, pairing_id: PairingId) {
        let config = &self.inner.config;
        let mut updates = self.inner.relay.poll_subscribe(
            functions::PAIRING_EXISTS,
            json!({ "pairingId": pairing_id.as_str() }),
            PollOptions::new(config.status_interval()).with_error_backoff(config.error_backoff()),
        );
        let weak = Arc::downgrade(&self.inner);

        let task = BackgroundTask::spawn(move |token| async move {
            loop {
                let update = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    update = updates.next() => update,
                };
                match update {
                    None => break,
                    // Only an explicit "false" ends the pairing; errors and
                    // nulls never do.
                    Some(Some(Value::Bool(false))) => {
                        let Some(manager) = upgrade(&weak) else { break };
                        let mut state = manager.inner.state.lock().await;
                        if token.is_cancelled() || state.pairing_id() != Some(&pairing_id) {
                            break;
                        }
                        tracing::info!("Pairing {} was removed on the relay", pairing_id);
                        manager
                            .drive_locked(&mut state, PairingEvent::RemoteRemoved)
                            .await;
                        break;
                    }
                    Some(_) => continue,
                }
            }
            tracing::debug!("Pairing status monitor stopped");
        });
        replace_task(&self.inner.monitor, task);
    }
}

impl std::fmt::Debug for PairingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingManager")
            .field("identity", &self.identity())
            .field("active", &self.active().map(|p| p.pairing_id))
            .finish_non_exhaustive()
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<PairingManager> {
    weak.upgrade().map(|inner| PairingManager { inner })
}

fn replace_task(slot: &Mutex<Option<BackgroundTask>>, task: BackgroundTask) {
    let previous = slot.lock().unwrap_or_else(|e| e.into_inner()).replace(task);
    drop(previous);
}

fn stop_task(slot: &Mutex<Option<BackgroundTask>>) {
    let task = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    drop(task);
}
