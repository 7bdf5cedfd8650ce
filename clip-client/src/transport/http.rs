//! HTTPS transport to the relay backend.

use super::{Endpoint, RelayTransport, TransportError};
use async_trait::async_trait;
use clip_types::{RelayRequest, RelayResponse};
use serde::Deserialize;
use std::sync::RwLock;
use std::time::Duration;

/// Default deadline for one relay call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::MalformedResponse(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

/// Error body some relays return alongside a non-2xx status.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// Relay transport over HTTPS (reqwest + rustls).
pub struct HttpTransport {
    base_url: RwLock<String>,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for `base_url` with the given per-call timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            base_url: RwLock::new(normalize(base_url)),
            http,
        })
    }

    /// Current relay base URL.
    pub fn base_url(&self) -> String {
        match self.base_url.read() {
            Ok(url) => url.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Full URL of an endpoint.
    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url(), endpoint.path())
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url())
            .finish()
    }
}

#[async_trait]
impl RelayTransport for HttpTransport {
    async fn call(
        &self,
        endpoint: Endpoint,
        request: &RelayRequest,
    ) -> Result<RelayResponse, TransportError> {
        let url = self.endpoint_url(endpoint);
        let response = self.http.post(&url).json(request).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error_message);
            return Err(match message {
                Some(msg) => TransportError::ServerRejected(msg),
                None => TransportError::Http(status.as_u16()),
            });
        }

        serde_json::from_slice(&body).map_err(|e| TransportError::MalformedResponse(e.to_string()))
    }

    fn retarget(&self, relay_url: &str) {
        let url = normalize(relay_url);
        match self.base_url.write() {
            Ok(mut current) => *current = url,
            Err(poisoned) => *poisoned.into_inner() = url,
        }
    }
}

fn normalize(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
