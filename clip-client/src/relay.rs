//! Typed access to relay functions and poll-based subscriptions.
//!
//! The relay only offers request/response calls. [`RelayClient::poll_subscribe`]
//! turns a query into a stream of changes by re-issuing it on an interval
//! and emitting only when the result differs from the last one emitted.

use crate::transport::{Endpoint, RelayTransport, TransportError};
use clip_types::{RelayRequest, WireError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default wait after a failed poll.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(2);

const SUBSCRIPTION_BUFFER: usize = 16;

impl From<WireError> for TransportError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Rejected(msg) => TransportError::ServerRejected(msg),
            WireError::Malformed(e) => TransportError::MalformedResponse(e.to_string()),
        }
    }
}

/// Liveness marker beaten by a poll loop on every tick.
#[derive(Debug, Clone)]
pub struct Heartbeat(Arc<Mutex<Instant>>);

impl Heartbeat {
    /// Create a heartbeat that was just beaten.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    /// Record a tick.
    pub fn beat(&self) {
        let mut last = self.0.lock().unwrap_or_else(|p| p.into_inner());
        *last = Instant::now();
    }

    /// Time of the last tick.
    pub fn last(&self) -> Instant {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings for one poll subscription.
#[derive(Debug, Clone)]
pub struct PollOptions {
    interval: Duration,
    error_backoff: Duration,
    heartbeat: Option<Heartbeat>,
}

impl PollOptions {
    /// Poll every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            error_backoff: DEFAULT_ERROR_BACKOFF,
            heartbeat: None,
        }
    }

    /// Wait `backoff` after a failed poll instead of the default.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Beat `heartbeat` on every tick, success or error.
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }
}

/// A running poll loop.
///
/// Yields `Some(value)` or `None` (relay returned null) whenever the result
/// changes. The loop stops when this handle is cancelled or dropped.
pub struct Subscription {
    rx: mpsc::Receiver<Option<Value>>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Wait for the next change. Returns `None` once the loop has stopped.
    pub async fn next(&mut self) -> Option<Option<Value>> {
        self.rx.recv().await
    }

    /// Stop the loop. It exits at its next await point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check if the loop was asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Check if the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Relay client: query, mutate and subscribe.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct RelayClient {
    transport: Arc<dyn RelayTransport>,
}

impl RelayClient {
    /// Create a client over `transport`.
    pub fn new(transport: Arc<dyn RelayTransport>) -> Self {
        Self { transport }
    }

    /// Point the transport at another relay.
    pub fn retarget(&self, relay_url: &str) {
        self.transport.retarget(relay_url);
    }

    /// Run a query. `null` results are `None`.
    pub async fn query(&self, path: &str, args: Value) -> Result<Option<Value>, TransportError> {
        let request = RelayRequest::new(path, args);
        let response = self.transport.call(Endpoint::Query, &request).await?;
        Ok(response.into_result()?)
    }

    /// Run a mutation. A `null` result is `Value::Null`.
    pub async fn mutate(&self, path: &str, args: Value) -> Result<Value, TransportError> {
        let request = RelayRequest::new(path, args);
        let response = self.transport.call(Endpoint::Mutation, &request).await?;
        Ok(response.into_result()?.unwrap_or(Value::Null))
    }

    /// Run a query and decode its result.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        path: &str,
        args: Value,
    ) -> Result<Option<T>, TransportError> {
        match self.query(path, args).await? {
            Some(value) => Ok(Some(decode(value)?)),
            None => Ok(None),
        }
    }

    /// Run a mutation and decode its result.
    pub async fn mutate_as<T: DeserializeOwned>(
        &self,
        path: &str,
        args: Value,
    ) -> Result<T, TransportError> {
        decode(self.mutate(path, args).await?)
    }

    /// Re-run a query on an interval and stream its changes.
    ///
    /// The first result is always emitted (even `null`). Errors are logged
    /// and retried after the error backoff; the loop never ends on its own.
    pub fn poll_subscribe(&self, path: &str, args: Value, options: PollOptions) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.clone(),
            path.to_string(),
            args,
            options,
            tx,
            token.clone(),
        ));
        Subscription { rx, token, handle }
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient").finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, TransportError> {
    serde_json::from_value(value).map_err(|e| TransportError::MalformedResponse(e.to_string()))
}

async fn poll_loop(
    client: RelayClient,
    path: String,
    args: Value,
    options: PollOptions,
    tx: mpsc::Sender<Option<Value>>,
    token: CancellationToken,
) {
    tracing::debug!("Poll subscription started: {}", path);
    let mut last: Option<Option<Value>> = None;

    loop {
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = client.query(&path, args.clone()) => result,
        };

        if let Some(heartbeat) = &options.heartbeat {
            heartbeat.beat();
        }

        let delay = match result {
            Ok(value) => {
                if last.as_ref() != Some(&value) {
                    last = Some(value.clone());
                    let sent = tokio::select! {
                        _ = token.cancelled() => break,
                        sent = tx.send(value) => sent,
                    };
                    if sent.is_err() {
                        // Receiver gone
                        break;
                    }
                }
                options.interval
            }
            Err(e) => {
                tracing::warn!("Poll of {} failed, retrying: {}", path, e);
                options.error_backoff
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::debug!("Poll subscription stopped: {}", path);
}
