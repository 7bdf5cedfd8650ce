//! End-to-end scenarios: two devices paired through one in-memory relay.
//!
//! Run with `RUST_LOG=duoclip_client=debug` to see the client logs.

use clip_core::{EngineNotice, EngineState, OutboundDecision, PairingNotice, UnpairReason};
use clip_types::functions;
use duoclip_client::{
    ClientConfig, ClientError, ClipSync, ClipboardSink, MemoryStore, MockRelay, OutboundOutcome,
    SyncNotice,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ============================================================================
// Harness
// ============================================================================

#[derive(Default)]
struct TestClipboard(Mutex<Vec<String>>);

impl TestClipboard {
    fn writes(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl ClipboardSink for TestClipboard {
    fn write_system_clipboard(&self, text: &str) {
        self.0.lock().unwrap().push(text.to_string());
    }
}

struct Device {
    sync: ClipSync,
    clipboard: Arc<TestClipboard>,
    store: MemoryStore,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config(name: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.pairing.device_name = name.to_string();
    config.polling.clipboard_interval_ms = 10;
    config.polling.pairing_watch_interval_ms = 10;
    config.polling.status_interval_ms = 20;
    config.polling.error_backoff_ms = 10;
    config.engine.start_retry_attempts = 2;
    config.engine.start_retry_delay_ms = 10;
    config
}

async fn open_with(relay: &MockRelay, store: MemoryStore, config: ClientConfig) -> Device {
    let clipboard = Arc::new(TestClipboard::default());
    let sync = ClipSync::open(
        config,
        Arc::new(store.clone()),
        Arc::new(relay.clone()),
        clipboard.clone(),
    )
    .await
    .unwrap();
    Device {
        sync,
        clipboard,
        store,
    }
}

async fn open(relay: &MockRelay, name: &str) -> Device {
    open_with(relay, MemoryStore::new(), fast_config(name)).await
}

async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_running(device: &Device) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if device.sync.sync_state().await == EngineState::Running {
            // Let the first poll prime the ledger
            tokio::time::sleep(Duration::from_millis(50)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine never started");
}

/// Laptop hosts, phone joins; returns once both engines run.
async fn paired_pair(relay: &MockRelay) -> (Device, Device) {
    init_tracing();
    let laptop = open(relay, "Laptop").await;
    let phone = open(relay, "Phone").await;

    let invite = laptop.sync.start_hosting().await.unwrap();
    phone.sync.join(&invite.qr_text).await.unwrap();

    wait_running(&laptop).await;
    wait_running(&phone).await;
    (laptop, phone)
}

// ============================================================================
// Pairing
// ============================================================================

/// Host shows a code, joiner scans it, both end up paired on one record
/// with the same secret.
#[tokio::test]
async fn pairing_end_to_end() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;

    let a = laptop.sync.active_pairing().unwrap();
    let b = phone.sync.active_pairing().unwrap();
    assert_eq!(a.pairing_id, b.pairing_id);
    assert_eq!(a.secret, b.secret);
    assert_eq!(a.counterpart.device_id, phone.sync.identity().device_id);
    assert_eq!(b.counterpart.device_id, laptop.sync.identity().device_id);
    assert_eq!(relay.pairings().len(), 1);
}

/// An unreadable code fails locally and never reaches the relay.
#[tokio::test]
async fn invalid_pairing_code_is_rejected() {
    init_tracing();
    let relay = MockRelay::new();
    let phone = open(&relay, "Phone").await;

    let err = phone.sync.join("{\"hello\":\"world\"}").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidPairingCode(_)));
    assert_eq!(relay.call_count(functions::PAIRING_CREATE), 0);
    assert!(!phone.sync.is_paired().await);
}

/// A restarted device picks its pairing back up and keeps syncing.
#[tokio::test]
async fn pairing_survives_restart() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;
    let phone_store = phone.store.clone();
    phone.sync.shutdown().await;
    drop(phone);

    let phone = open_with(&relay, phone_store, fast_config("Phone")).await;
    assert!(phone.sync.is_paired().await);
    wait_running(&phone).await;

    laptop.sync.notify_local_change("after restart").await.unwrap();
    wait_until("phone receives", || {
        phone.clipboard.writes() == vec!["after restart".to_string()]
    })
    .await;
}

// ============================================================================
// Clipboard sync
// ============================================================================

/// Text copied on one device lands on the other, in both directions.
#[tokio::test]
async fn round_trip_both_directions() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;

    let outcome = laptop.sync.notify_local_change("hello phone").await.unwrap();
    assert!(matches!(outcome, OutboundOutcome::Uploaded { .. }));
    wait_until("phone receives", || {
        phone.clipboard.writes() == vec!["hello phone".to_string()]
    })
    .await;

    phone.sync.notify_local_change("hello laptop").await.unwrap();
    wait_until("laptop receives", || {
        laptop.clipboard.writes() == vec!["hello laptop".to_string()]
    })
    .await;

    // Relay only ever saw ciphertext
    for row in relay.clipboard_rows() {
        assert!(!row.ciphertext.contains("hello"));
    }
}

/// An applied item reported back by the OS clipboard is not re-uploaded,
/// so the two devices never ping-pong.
#[tokio::test]
async fn applied_item_is_not_echoed() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;

    laptop.sync.notify_local_change("no echo").await.unwrap();
    wait_until("phone receives", || !phone.clipboard.writes().is_empty()).await;

    let outcome = phone.sync.notify_local_change("no echo").await.unwrap();
    assert_eq!(
        outcome,
        OutboundOutcome::Skipped(OutboundDecision::SuppressedEcho)
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.clipboard_rows().len(), 1);
    assert!(laptop.clipboard.writes().is_empty());
}

/// A device never applies what it uploaded itself.
#[tokio::test]
async fn own_items_are_not_applied() {
    let relay = MockRelay::new();
    let (laptop, _phone) = paired_pair(&relay).await;

    laptop.sync.notify_local_change("mine").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(laptop.clipboard.writes().is_empty());
}

/// Whatever is on the relay when a device starts is not pasted into its
/// clipboard; only later items are.
#[tokio::test]
async fn first_run_does_not_apply_stale_item() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;
    let phone_store = phone.store.clone();
    phone.sync.shutdown().await;
    drop(phone);

    laptop.sync.notify_local_change("stale").await.unwrap();

    let phone = open_with(&relay, phone_store, fast_config("Phone")).await;
    wait_running(&phone).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(phone.clipboard.writes().is_empty());

    laptop.sync.notify_local_change("fresh").await.unwrap();
    wait_until("phone receives fresh item", || {
        phone.clipboard.writes() == vec!["fresh".to_string()]
    })
    .await;
}

/// Copying the same text twice uploads once.
#[tokio::test]
async fn duplicate_copy_uploads_once() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;

    laptop.sync.notify_local_change("twice").await.unwrap();
    let second = laptop.sync.notify_local_change("twice").await.unwrap();
    assert_eq!(second, OutboundOutcome::Skipped(OutboundDecision::Duplicate));
    assert_eq!(relay.clipboard_rows().len(), 1);

    wait_until("phone receives", || !phone.clipboard.writes().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(phone.clipboard.writes().len(), 1);
}

/// A row whose ciphertext was altered on the relay is dropped and counted.
#[tokio::test]
async fn tampered_item_is_rejected() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;
    let mut notices = phone.sync.sync_notices();

    let pairing = laptop.sync.active_pairing().unwrap();
    let sealed =
        duoclip_client::crypto::seal_text("tampered", &pairing.secret).unwrap();
    let mut forged: Vec<char> = sealed.chars().collect();
    // Flip a character inside the ciphertext body
    let mid = forged.len() / 2;
    forged[mid] = if forged[mid] == 'A' { 'B' } else { 'A' };
    let forged: String = forged.into_iter().collect();
    relay.insert_row(
        &pairing.pairing_id,
        &laptop.sync.identity().device_id,
        &forged,
    );

    let failed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(SyncNotice::DecryptFailed { .. }) = notices.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(failed.is_ok());
    assert!(phone.clipboard.writes().is_empty());
    assert_eq!(phone.sync.health().await.decrypt_failures, 1);

    // Later genuine items still flow
    laptop.sync.notify_local_change("genuine").await.unwrap();
    wait_until("phone receives genuine item", || {
        phone.clipboard.writes() == vec!["genuine".to_string()]
    })
    .await;
}

/// Paused devices neither upload nor apply; resume catches up.
#[tokio::test]
async fn pause_and_resume() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;

    phone.sync.pause().await;
    assert_eq!(phone.sync.sync_state().await, EngineState::Paused);
    assert_eq!(
        phone.sync.notify_local_change("ignored").await.unwrap(),
        OutboundOutcome::NotRunning
    );

    laptop.sync.notify_local_change("queued").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(phone.clipboard.writes().is_empty());

    phone.sync.resume().await;
    wait_until("phone catches up", || {
        phone.clipboard.writes() == vec!["queued".to_string()]
    })
    .await;
}

/// History and stats follow uploads and applies.
#[tokio::test]
async fn history_and_stats_are_recorded() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;

    laptop.sync.notify_local_change("one").await.unwrap();
    wait_until("phone receives", || !phone.clipboard.writes().is_empty()).await;

    let sent = laptop.sync.history();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].device_name, "Laptop");

    let received = phone.sync.history();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].device_name, "Laptop");

    assert_eq!(laptop.sync.stats().stats.sent, 1);
    assert_eq!(phone.sync.stats().stats.received, 1);
    assert_eq!(phone.store.snapshot().stats.received, 1);
}

// ============================================================================
// Unpairing and resilience
// ============================================================================

/// Unpairing on one device is noticed by the other within a couple of
/// status polls; both stop syncing and forget the secret.
#[tokio::test]
async fn remote_unpair_propagates() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;
    let mut laptop_notices = laptop.sync.pairing_notices();

    laptop.sync.notify_local_change("before").await.unwrap();
    wait_until("phone receives", || !phone.clipboard.writes().is_empty()).await;

    let warnings = phone.sync.unpair().await;
    assert!(warnings.is_empty());
    assert!(phone.sync.history().is_empty());

    let notice = tokio::time::timeout(Duration::from_millis(500), laptop_notices.recv())
        .await
        .expect("laptop did not notice the unpair")
        .unwrap();
    assert_eq!(
        notice,
        PairingNotice::Unpaired {
            reason: UnpairReason::RemoteRemoved
        }
    );

    wait_until("laptop stops", || laptop.sync.active_pairing().is_none()).await;
    let deadline = Instant::now() + Duration::from_secs(1);
    while laptop.sync.sync_state().await != EngineState::Stopped {
        assert!(Instant::now() < deadline, "laptop engine still running");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(laptop.store.snapshot().shared_secret.is_none());
    assert!(phone.store.snapshot().shared_secret.is_none());
    assert!(relay.pairings().is_empty());
}

/// A device whose pairing is gone cannot upload.
#[tokio::test]
async fn sync_refuses_to_start_unpaired() {
    init_tracing();
    let relay = MockRelay::new();
    let phone = open(&relay, "Phone").await;
    let mut notices = phone.sync.sync_notices();

    let err = phone.sync.start_sync().await.unwrap_err();
    assert!(matches!(err, ClientError::NotPaired));
    assert_eq!(
        notices.recv().await.unwrap(),
        SyncNotice::Lifecycle(EngineNotice::StartAbandoned { attempts: 2 })
    );
    assert_eq!(
        phone.sync.notify_local_change("x").await.unwrap(),
        OutboundOutcome::NotRunning
    );
}

/// A relay call that never returns is detected by the watchdog and the
/// listener is rebuilt; sync resumes once the relay answers again.
#[tokio::test]
async fn watchdog_restarts_stalled_listener() {
    init_tracing();
    let relay = MockRelay::new();
    let mut phone_config = fast_config("Phone");
    phone_config.engine.watchdog_interval_ms = 20;
    phone_config.engine.watchdog_stale_ms = 80;

    let laptop = open(&relay, "Laptop").await;
    let phone = open_with(&relay, MemoryStore::new(), phone_config).await;
    let invite = laptop.sync.start_hosting().await.unwrap();
    phone.sync.join(&invite.qr_text).await.unwrap();
    wait_running(&laptop).await;
    wait_running(&phone).await;
    let mut notices = phone.sync.sync_notices();

    relay.set_stalled(true);
    let restarted = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let Ok(SyncNotice::Lifecycle(EngineNotice::ListenerRestarted)) =
                notices.recv().await
            {
                break;
            }
        }
    })
    .await;
    assert!(restarted.is_ok(), "watchdog never fired");
    relay.set_stalled(false);

    assert!(phone.sync.health().await.listener_restarts >= 1);
    assert!(phone.sync.is_paired().await);

    laptop.sync.notify_local_change("after stall").await.unwrap();
    wait_until("phone receives after stall", || {
        phone.clipboard.writes() == vec!["after stall".to_string()]
    })
    .await;
}

/// Relay outages are retried without unpairing.
#[tokio::test]
async fn relay_outage_is_ridden_out() {
    let relay = MockRelay::new();
    let (laptop, phone) = paired_pair(&relay).await;

    relay.set_offline(true);
    let err = laptop.sync.notify_local_change("offline").await.unwrap_err();
    assert!(err.is_transient());
    tokio::time::sleep(Duration::from_millis(100)).await;
    relay.set_offline(false);

    assert!(laptop.sync.is_paired().await);
    assert!(phone.sync.is_paired().await);

    laptop.sync.notify_local_change("online again").await.unwrap();
    wait_until("phone receives", || {
        phone.clipboard.writes() == vec!["online again".to_string()]
    })
    .await;
}
