//! In-memory relay for testing.
//!
//! Implements the backend functions the client calls, keeps a call log and
//! lets tests inject failures or stall the relay entirely. Clones share
//! state, so two clients can be paired through one `MockRelay`.

use super::{Endpoint, RelayTransport, TransportError};
use async_trait::async_trait;
use clip_types::{
    functions, ClipboardEnvelope, ContentKind, DeviceId, ItemId, PairingId, PairingRecord,
    PairingStatus, RelayRequest, RelayResponse,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;

/// In-memory relay backend for testing.
#[derive(Clone)]
pub struct MockRelay {
    inner: Arc<Mutex<MockRelayInner>>,
    stalled: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct MockRelayInner {
    next_id: u64,
    last_time_ms: f64,
    pairings: Vec<PairingRecord>,
    clipboard: Vec<ClipboardEnvelope>,
    calls: Vec<(Endpoint, RelayRequest)>,
    fail_next: u32,
    offline: bool,
}

impl MockRelayInner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    /// Strictly increasing server clock (ms since epoch).
    fn now_ms(&mut self) -> f64 {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0);
        self.last_time_ms = wall.max(self.last_time_ms + 1.0);
        self.last_time_ms
    }
}

impl MockRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        let (stalled, _) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(MockRelayInner::default())),
            stalled: Arc::new(stalled),
        }
    }

    /// Cause the next `count` calls to fail with a network error.
    pub fn fail_next(&self, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next = count;
    }

    /// Fail every call with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.offline = offline;
    }

    /// Make calls hang (no response, no error) until switched back.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.send_replace(stalled);
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<(Endpoint, RelayRequest)> {
        let inner = self.inner.lock().unwrap();
        inner.calls.clone()
    }

    /// Number of calls made to `path`.
    pub fn call_count(&self, path: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.calls.iter().filter(|(_, r)| r.path == path).count()
    }

    /// Pairing records currently stored.
    pub fn pairings(&self) -> Vec<PairingRecord> {
        let inner = self.inner.lock().unwrap();
        inner.pairings.clone()
    }

    /// Clipboard rows currently stored, oldest first.
    pub fn clipboard_rows(&self) -> Vec<ClipboardEnvelope> {
        let inner = self.inner.lock().unwrap();
        inner.clipboard.clone()
    }

    /// Delete a pairing as if another client had removed it.
    pub fn remove_pairing(&self, pairing_id: &PairingId) {
        let mut inner = self.inner.lock().unwrap();
        inner.pairings.retain(|p| &p.pairing_id != pairing_id);
    }

    /// Insert a raw clipboard row (e.g. tampered ciphertext).
    pub fn insert_row(
        &self,
        pairing_id: &PairingId,
        source: &DeviceId,
        ciphertext: &str,
    ) -> ItemId {
        let mut inner = self.inner.lock().unwrap();
        let item_id = ItemId::new(inner.next_id("clip"));
        let created_at = inner.now_ms();
        inner.clipboard.push(ClipboardEnvelope {
            item_id: item_id.clone(),
            created_at,
            ciphertext: ciphertext.to_string(),
            pairing_id: pairing_id.clone(),
            source_device_id: source.clone(),
            kind: ContentKind::Text,
        });
        item_id
    }

    fn dispatch(&self, endpoint: Endpoint, request: &RelayRequest) -> RelayResponse {
        let mut inner = self.inner.lock().unwrap();
        let args = &request.args;
        let expected = match request.path.as_str() {
            functions::PAIRING_EXISTS | functions::PAIRING_WATCH | functions::CLIPBOARD_LATEST => {
                Endpoint::Query
            }
            _ => Endpoint::Mutation,
        };
        if endpoint != expected {
            return RelayResponse::error(format!(
                "{} cannot be called through {}",
                request.path,
                endpoint.path()
            ));
        }

        match request.path.as_str() {
            functions::PAIRING_CREATE => {
                let (Some(b_id), Some(a_id)) =
                    (arg(args, "androidDeviceId"), arg(args, "macDeviceId"))
                else {
                    return RelayResponse::error("missing device ids");
                };
                let pairing_id = PairingId::new(inner.next_id("pairing"));
                let now = inner.now_ms();
                inner.pairings.push(PairingRecord {
                    pairing_id: pairing_id.clone(),
                    creation_time: now,
                    device_a_id: DeviceId::new(a_id),
                    device_a_name: arg(args, "macDeviceName").unwrap_or_default(),
                    device_b_id: DeviceId::new(b_id),
                    device_b_name: arg(args, "androidDeviceName").unwrap_or_default(),
                    status: PairingStatus::Active,
                    created_at: now,
                });
                RelayResponse::success(json!(pairing_id.as_str()))
            }
            functions::PAIRING_REMOVE => {
                let Some(id) = arg(args, "pairingId") else {
                    return RelayResponse::error("missing pairingId");
                };
                inner.pairings.retain(|p| p.pairing_id.as_str() != id);
                inner.clipboard.retain(|c| c.pairing_id.as_str() != id);
                RelayResponse::success(Value::Null)
            }
            functions::PAIRING_EXISTS => {
                let Some(id) = arg(args, "pairingId") else {
                    return RelayResponse::error("missing pairingId");
                };
                let exists = inner.pairings.iter().any(|p| p.pairing_id.as_str() == id);
                RelayResponse::success(json!(exists))
            }
            functions::PAIRING_WATCH => {
                let Some(host) = arg(args, "macDeviceId") else {
                    return RelayResponse::error("missing macDeviceId");
                };
                let since = args
                    .get("sinceTimestamp")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                let latest = inner
                    .pairings
                    .iter()
                    .filter(|p| p.device_a_id.as_str() == host && p.created_at >= since)
                    .max_by(|a, b| a.created_at.total_cmp(&b.created_at));
                match latest {
                    Some(record) => RelayResponse::success(to_value(record)),
                    None => RelayResponse::success(Value::Null),
                }
            }
            functions::CLIPBOARD_SEND => {
                let (Some(pairing), Some(content), Some(source)) = (
                    arg(args, "pairingId"),
                    arg(args, "content"),
                    arg(args, "sourceDeviceId"),
                ) else {
                    return RelayResponse::error("missing clipboard fields");
                };
                if !inner.pairings.iter().any(|p| p.pairing_id.as_str() == pairing) {
                    return RelayResponse::error("Pairing not found");
                }
                let item_id = ItemId::new(inner.next_id("clip"));
                let created_at = inner.now_ms();
                inner.clipboard.push(ClipboardEnvelope {
                    item_id: item_id.clone(),
                    created_at,
                    ciphertext: content,
                    pairing_id: PairingId::new(pairing),
                    source_device_id: DeviceId::new(source),
                    kind: ContentKind::Text,
                });
                RelayResponse::success(json!(item_id.as_str()))
            }
            functions::CLIPBOARD_LATEST => {
                let Some(pairing) = arg(args, "pairingId") else {
                    return RelayResponse::error("missing pairingId");
                };
                let latest = inner
                    .clipboard
                    .iter()
                    .filter(|c| c.pairing_id.as_str() == pairing)
                    .max_by(|a, b| a.created_at.total_cmp(&b.created_at));
                match latest {
                    Some(row) => RelayResponse::success(to_value(row)),
                    None => RelayResponse::success(Value::Null),
                }
            }
            functions::CLIPBOARD_CLEAR => {
                let Some(pairing) = arg(args, "pairingId") else {
                    return RelayResponse::error("missing pairingId");
                };
                let before = inner.clipboard.len();
                inner.clipboard.retain(|c| c.pairing_id.as_str() != pairing);
                RelayResponse::success(json!(before - inner.clipboard.len()))
            }
            other => RelayResponse::error(format!("Unknown function {}", other)),
        }
    }
}

impl Default for MockRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRelay")
            .field("stalled", &*self.stalled.borrow())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RelayTransport for MockRelay {
    async fn call(
        &self,
        endpoint: Endpoint,
        request: &RelayRequest,
    ) -> Result<RelayResponse, TransportError> {
        let mut stalled = self.stalled.subscribe();
        while *stalled.borrow_and_update() {
            if stalled.changed().await.is_err() {
                return Err(TransportError::Network("relay gone".into()));
            }
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.calls.push((endpoint, request.clone()));

            if inner.offline {
                return Err(TransportError::Network("relay offline".into()));
            }

            // Check for forced failure
            if inner.fail_next > 0 {
                inner.fail_next -= 1;
                return Err(TransportError::Network("injected failure".into()));
            }
        }

        Ok(self.dispatch(endpoint, request))
    }
}

fn arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

fn to_value<T: serde::Serialize>(doc: &T) -> Value {
    serde_json::to_value(doc).unwrap_or(Value::Null)
}
