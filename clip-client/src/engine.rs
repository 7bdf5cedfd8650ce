//! SyncEngine - clipboard upload, inbound apply and listener watchdog.
//!
//! The decisions come from clip-core: [`SyncLedger`] for echo and duplicate
//! rules, [`EngineState`] for the lifecycle and [`ListenerWatchdog`] for
//! liveness. This module does the I/O around them.
//!
//! ```text
//! local copy ──► notify_local_change ──► seal ──► clipboard:send
//! clipboard:getLatest (poll) ──► ledger ──► open ──► ClipboardSink
//! watchdog ──► heartbeat stale ──► restart listener
//! ```

use crate::config::ClientConfig;
use crate::crypto;
use crate::error::ClientError;
use crate::now_ms;
use crate::pairing::PairingHandle;
use crate::relay::{Heartbeat, PollOptions, RelayClient};
use crate::store::StateCell;
use crate::task::BackgroundTask;
use clip_core::{
    ApplyDecision, Direction, EngineAction, EngineEvent, EngineNotice, EngineState,
    HistoryEntry, InboundDecision, ListenerWatchdog, OutboundDecision, SyncHistory, SyncLedger,
    SyncStats, WatchdogVerdict,
};
use clip_types::{functions, ClipboardEnvelope, ContentKind, DeviceIdentity, ItemId};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const NOTICE_CAPACITY: usize = 64;

/// Where applied remote content goes.
///
/// Implementations write the OS clipboard. The call happens while the
/// engine's echo window is already open, so a clipboard listener that
/// reports the write back through
/// [`notify_local_change`](SyncEngine::notify_local_change) is suppressed.
pub trait ClipboardSink: Send + Sync {
    /// Replace the system clipboard with `text`.
    fn write_system_clipboard(&self, text: &str);
}

/// Result of [`SyncEngine::notify_local_change`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundOutcome {
    /// Sealed and stored on the relay.
    Uploaded {
        /// Relay id of the new row.
        item_id: ItemId,
    },
    /// Dropped by the ledger (empty, echo or duplicate).
    Skipped(OutboundDecision),
    /// Engine is stopped or paused.
    NotRunning,
}

/// Events surfaced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// Lifecycle change.
    Lifecycle(EngineNotice),
    /// A local change was uploaded.
    Sent {
        /// Relay id of the row.
        item_id: ItemId,
    },
    /// A remote item was applied to the clipboard.
    Received {
        /// Relay id of the row.
        item_id: ItemId,
        /// Counterpart display name.
        device_name: String,
    },
    /// A remote item failed authentication and was dropped.
    DecryptFailed {
        /// Relay id of the row.
        item_id: ItemId,
    },
}

/// Health counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHealth {
    /// Lifecycle state.
    pub state: EngineState,
    /// Watchdog-forced listener restarts.
    pub listener_restarts: u64,
    /// Remote items dropped because they failed to decrypt.
    pub decrypt_failures: u64,
    /// Time since the inbound loop last ticked.
    pub since_last_beat: Duration,
}

/// Stats plus the derived streak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Counters.
    pub stats: SyncStats,
    /// Consecutive active days.
    pub streak: u32,
}

/// Sync engine.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

struct Inner {
    relay: RelayClient,
    cell: StateCell,
    config: ClientConfig,
    identity: RwLock<DeviceIdentity>,
    pairing: PairingHandle,
    sink: Arc<dyn ClipboardSink>,
    state: tokio::sync::Mutex<EngineState>,
    // Held across an upload so an inbound apply can't interleave.
    ledger: tokio::sync::Mutex<SyncLedger>,
    history: Mutex<SyncHistory>,
    stats: Mutex<SyncStats>,
    heartbeat: Heartbeat,
    listener: Mutex<Option<BackgroundTask>>,
    watchdog: Mutex<Option<BackgroundTask>>,
    listener_restarts: AtomicU64,
    decrypt_failures: AtomicU64,
    notices: broadcast::Sender<SyncNotice>,
}

enum FollowUp {
    Done,
    Event(EngineEvent),
    Retry,
}

impl SyncEngine {
    /// Create a stopped engine.
    pub fn new(
        relay: RelayClient,
        cell: StateCell,
        config: ClientConfig,
        identity: DeviceIdentity,
        pairing: PairingHandle,
        sink: Arc<dyn ClipboardSink>,
        stats: SyncStats,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                ledger: tokio::sync::Mutex::new(SyncLedger::new(config.echo_window())),
                history: Mutex::new(SyncHistory::new(config.engine.history_limit)),
                relay,
                cell,
                config,
                identity: RwLock::new(identity),
                pairing,
                sink,
                state: tokio::sync::Mutex::new(EngineState::new()),
                stats: Mutex::new(stats),
                heartbeat: Heartbeat::new(),
                listener: Mutex::new(None),
                watchdog: Mutex::new(None),
                listener_restarts: AtomicU64::new(0),
                decrypt_failures: AtomicU64::new(0),
                notices,
            }),
        }
    }

    /// Start syncing.
    ///
    /// Waits for an active pairing, retrying `start_retry_attempts` times
    /// `start_retry_delay` apart. Fails with [`ClientError::NotPaired`] when
    /// none shows up. Starting a running engine is a no-op.
    pub async fn start(&self) -> Result<(), ClientError> {
        let max_attempts = self.inner.config.engine.start_retry_attempts;
        let mut event = EngineEvent::StartRequested { max_attempts };
        loop {
            match self.drive(event).await {
                FollowUp::Done => break,
                FollowUp::Event(next) => event = next,
                FollowUp::Retry => {
                    tokio::time::sleep(self.inner.config.start_retry_delay()).await;
                    event = EngineEvent::RetryTimer;
                }
            }
        }

        match self.state().await {
            EngineState::Running | EngineState::Paused => Ok(()),
            _ => Err(ClientError::NotPaired),
        }
    }

    /// Stop syncing. The ledger is reset on the next start.
    pub async fn stop(&self) {
        self.drive(EngineEvent::StopRequested).await;
        self.settle_inbound().await;
    }

    /// Stop both loops, keeping ledger, history and stats.
    pub async fn pause(&self) {
        self.drive(EngineEvent::PauseRequested).await;
        self.settle_inbound().await;
    }

    /// Restart both loops after [`pause`](Self::pause).
    pub async fn resume(&self) {
        self.drive(EngineEvent::ResumeRequested).await;
    }

    /// Restart the inbound listener now. Returns false when not running.
    pub async fn pull_now(&self) -> bool {
        if !self.state().await.is_running() {
            return false;
        }
        self.drive(EngineEvent::RefreshRequested).await;
        true
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> EngineState {
        *self.inner.state.lock().await
    }

    /// Subscribe to engine notices.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.inner.notices.subscribe()
    }

    /// Use a new identity (after a rename).
    pub fn set_identity(&self, identity: DeviceIdentity) {
        *self.inner.identity.write().unwrap_or_else(|e| e.into_inner()) = identity;
    }

    /// Upload a local clipboard change.
    ///
    /// The ledger lock is held for the whole upload; on failure the ledger
    /// is unchanged and the error is returned.
    pub async fn notify_local_change(&self, text: &str) -> Result<OutboundOutcome, ClientError> {
        if !self.state().await.is_running() {
            return Ok(OutboundOutcome::NotRunning);
        }
        let active = self.inner.pairing.current().ok_or(ClientError::NotPaired)?;
        let identity = self.identity();

        let mut ledger = self.inner.ledger.lock().await;
        match ledger.check_outbound(text, Instant::now()) {
            OutboundDecision::Upload => {}
            skipped => {
                tracing::debug!("Local change not uploaded: {:?}", skipped);
                return Ok(OutboundOutcome::Skipped(skipped));
            }
        }

        let content = crypto::seal_text(text, &active.secret)?;
        let args = json!({
            "pairingId": active.pairing_id.as_str(),
            "content": content,
            "sourceDeviceId": identity.device_id.as_str(),
            "type": ContentKind::Text,
        });
        let item_id: String = self
            .inner
            .relay
            .mutate_as(functions::CLIPBOARD_SEND, args)
            .await?;
        ledger.record_sent(text);
        drop(ledger);

        let item_id = ItemId::new(item_id);
        tracing::debug!("Uploaded clipboard item {}", item_id);
        self.record(text.to_string(), identity.display_name, Direction::Sent)
            .await;
        self.notify(SyncNotice::Sent {
            item_id: item_id.clone(),
        });
        Ok(OutboundOutcome::Uploaded { item_id })
    }

    /// Delete every row of the current pairing on the relay.
    ///
    /// Returns how many rows were removed.
    pub async fn clear_remote_history(&self) -> Result<u64, ClientError> {
        let active = self.inner.pairing.current().ok_or(ClientError::NotPaired)?;
        let removed: u64 = self
            .inner
            .relay
            .mutate_as(
                functions::CLIPBOARD_CLEAR,
                json!({ "pairingId": active.pairing_id.as_str() }),
            )
            .await?;
        tracing::info!("Cleared {} clipboard items from relay", removed);
        Ok(removed)
    }

    /// Recent items, newest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.inner.history).entries().cloned().collect()
    }

    /// Forget local history.
    pub fn clear_history(&self) {
        lock(&self.inner.history).clear();
    }

    /// Counters plus streak, as of now.
    pub fn stats(&self) -> StatsSnapshot {
        let today = chrono::Local::now().date_naive();
        let mut stats = lock(&self.inner.stats).clone();
        stats.roll_day(today);
        let streak = stats.streak(today);
        StatsSnapshot { stats, streak }
    }

    /// Health counters.
    pub async fn health(&self) -> EngineHealth {
        EngineHealth {
            state: self.state().await,
            listener_restarts: self.inner.listener_restarts.load(Ordering::Relaxed),
            decrypt_failures: self.inner.decrypt_failures.load(Ordering::Relaxed),
            since_last_beat: self.inner.heartbeat.last().elapsed(),
        }
    }

    /// Cancel background tasks without going through the state machine.
    pub fn shutdown(&self) {
        stop_task(&self.inner.listener);
        stop_task(&self.inner.watchdog);
    }

    fn identity(&self) -> DeviceIdentity {
        self.inner
            .identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn drive(&self, event: EngineEvent) -> FollowUp {
        let mut state = self.inner.state.lock().await;
        let before = *state;
        let (next, actions) = before.on_event(event);
        *state = next;

        if before == EngineState::Stopped && matches!(next, EngineState::Starting { .. }) {
            *self.inner.ledger.lock().await = SyncLedger::new(self.inner.config.echo_window());
        }

        let mut follow_up = FollowUp::Done;
        for action in actions {
            if let Some(next) = self.execute(action) {
                follow_up = next;
            }
        }
        follow_up
    }

    fn execute(&self, action: EngineAction) -> Option<FollowUp> {
        match action {
            EngineAction::CheckPairing => {
                let event = if self.inner.pairing.current().is_some() {
                    EngineEvent::PairingReady
                } else {
                    EngineEvent::PairingMissing
                };
                return Some(FollowUp::Event(event));
            }
            EngineAction::ScheduleRetry { attempt } => {
                tracing::debug!("No active pairing yet; start attempt {} pending", attempt);
                return Some(FollowUp::Retry);
            }
            EngineAction::StartListener => self.spawn_listener(),
            EngineAction::StopListener => stop_task(&self.inner.listener),
            EngineAction::RestartListener => {
                stop_task(&self.inner.listener);
                self.spawn_listener();
            }
            EngineAction::StartWatchdog => self.spawn_watchdog(),
            EngineAction::StopWatchdog => stop_task(&self.inner.watchdog),
            EngineAction::Notify(notice) => {
                match notice {
                    EngineNotice::StartAbandoned { attempts } => {
                        tracing::warn!("Sync not started: no pairing after {} attempts", attempts)
                    }
                    EngineNotice::ListenerRestarted => {
                        self.inner.listener_restarts.fetch_add(1, Ordering::Relaxed);
                    }
                    other => tracing::info!("Sync engine {:?}", other),
                }
                self.notify(SyncNotice::Lifecycle(notice));
            }
        }
        None
    }

    /// Wait out an inbound item that was mid-apply when the listener was
    /// cancelled. Later items see the cancelled token under the same lock.
    async fn settle_inbound(&self) {
        drop(self.inner.ledger.lock().await);
    }

    fn spawn_listener(&self) {
        let Some(active) = self.inner.pairing.current() else {
            tracing::warn!("No active pairing; inbound listener not started");
            return;
        };
        let config = &self.inner.config;
        self.inner.heartbeat.beat();
        let mut updates = self.inner.relay.poll_subscribe(
            functions::CLIPBOARD_LATEST,
            json!({ "pairingId": active.pairing_id.as_str() }),
            PollOptions::new(config.clipboard_interval())
                .with_error_backoff(config.error_backoff())
                .with_heartbeat(self.inner.heartbeat.clone()),
        );
        let weak = Arc::downgrade(&self.inner);

        let task = BackgroundTask::spawn(move |token| async move {
            tracing::debug!("Inbound listener started");
            loop {
                let update = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    update = updates.next() => update,
                };
                let Some(value) = update else { break };
                let Some(engine) = upgrade(&weak) else { break };
                engine.handle_inbound(value, &token).await;
            }
            tracing::debug!("Inbound listener stopped");
        });
        replace_task(&self.inner.listener, task);
    }

    async fn handle_inbound(&self, value: Option<Value>, token: &CancellationToken) {
        let mut ledger = self.inner.ledger.lock().await;
        let Some(value) = value else {
            ledger.observe_empty();
            return;
        };
        let envelope: ClipboardEnvelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Skipping malformed clipboard item: {}", e);
                return;
            }
        };
        let Some(active) = self.inner.pairing.current() else {
            return;
        };
        if envelope.pairing_id != active.pairing_id {
            tracing::debug!("Ignoring item {} of another pairing", envelope.item_id);
            return;
        }

        let local = self.identity().device_id;
        match ledger.check_inbound(&envelope.item_id, &envelope.source_device_id, &local) {
            InboundDecision::Decrypt => {}
            InboundDecision::Primed => {
                tracing::debug!("Inbound listener primed at {}", envelope.item_id);
                return;
            }
            InboundDecision::AlreadySeen | InboundDecision::OwnOrigin => return,
        }

        let text = match crypto::open_text(&envelope.ciphertext, &active.secret) {
            Ok(text) => text,
            Err(e) => {
                // Never retried, never applied.
                ledger.mark_seen(&envelope.item_id);
                self.inner.decrypt_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "SECURITY: dropped clipboard item {} from {}: {}",
                    envelope.item_id,
                    envelope.source_device_id,
                    e
                );
                self.notify(SyncNotice::DecryptFailed {
                    item_id: envelope.item_id,
                });
                return;
            }
        };

        // Stopped or unpaired while this item was in flight.
        let still_paired = self
            .inner
            .pairing
            .current()
            .is_some_and(|current| current.pairing_id == active.pairing_id);
        if token.is_cancelled() || !still_paired {
            tracing::debug!("Dropping item {}: listener stopped", envelope.item_id);
            return;
        }
        if ledger.apply(&envelope.item_id, &text, Instant::now()) == ApplyDecision::SameAsApplied {
            return;
        }
        self.inner.sink.write_system_clipboard(&text);
        drop(ledger);

        tracing::debug!("Applied clipboard item {}", envelope.item_id);
        let device_name = active.counterpart.display_name;
        self.record(text, device_name.clone(), Direction::Received)
            .await;
        self.notify(SyncNotice::Received {
            item_id: envelope.item_id,
            device_name,
        });
    }

    fn spawn_watchdog(&self) {
        let watchdog = ListenerWatchdog::new(self.inner.config.watchdog_stale());
        let interval = self.inner.config.watchdog_interval();
        let heartbeat = self.inner.heartbeat.clone();
        let weak = Arc::downgrade(&self.inner);

        let task = BackgroundTask::spawn(move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let WatchdogVerdict::Stale { silent_for } =
                    watchdog.check(heartbeat.last(), Instant::now())
                {
                    let Some(engine) = upgrade(&weak) else { break };
                    if token.is_cancelled() {
                        break;
                    }
                    tracing::warn!(
                        "Inbound listener silent for {:?}; restarting it",
                        silent_for
                    );
                    engine.drive(EngineEvent::ListenerStale).await;
                }
            }
            tracing::debug!("Watchdog stopped");
        });
        replace_task(&self.inner.watchdog, task);
    }

    async fn record(&self, content: String, device_name: String, direction: Direction) {
        let today = chrono::Local::now().date_naive();
        lock(&self.inner.history).record(HistoryEntry {
            content,
            device_name,
            direction,
            at_ms: now_ms(),
        });
        let stats = {
            let mut stats = lock(&self.inner.stats);
            stats.record(direction, today);
            stats.clone()
        };
        if let Err(e) = self.inner.cell.update(|s| s.stats = stats).await {
            tracing::warn!("Failed to persist sync stats: {}", e);
        }
    }

    fn notify(&self, notice: SyncNotice) {
        // No receivers is fine
        let _ = self.inner.notices.send(notice);
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field(
                "listener_restarts",
                &self.inner.listener_restarts.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn upgrade(weak: &Weak<Inner>) -> Option<SyncEngine> {
    weak.upgrade().map(|inner| SyncEngine { inner })
}

fn replace_task(slot: &Mutex<Option<BackgroundTask>>, task: BackgroundTask) {
    let previous = lock(slot).replace(task);
    drop(previous);
}

fn stop_task(slot: &Mutex<Option<BackgroundTask>>) {
    let task = lock(slot).take();
    drop(task);
}
