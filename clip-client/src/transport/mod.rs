//! Transport abstraction for duoclip.
//!
//! This module provides a pluggable transport layer that abstracts how
//! relay calls reach the backend (HTTPS, in-memory mock for testing).
//!
//! # Design
//!
//! The transport trait is async and request/response oriented:
//! - `call()` posts one [`RelayRequest`] to the query or mutation endpoint
//! - `retarget()` switches to the relay named in a pairing payload
//!
//! # Example
//!
//! ```ignore
//! let transport = MockRelay::new();
//! let req = RelayRequest::new("pairings:exists", json!({"pairingId": "p1"}));
//! let resp = transport.call(Endpoint::Query, &req).await?;
//! ```

mod http;
mod mock;

pub use http::HttpTransport;
pub use mock::MockRelay;

use async_trait::async_trait;
use clip_types::{RelayRequest, RelayResponse};
use thiserror::Error;

/// Which relay endpoint a call goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Read-only function (`/api/query`).
    Query,
    /// Write function (`/api/mutation`).
    Mutation,
}

impl Endpoint {
    /// URL path of the endpoint.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Query => "/api/query",
            Endpoint::Mutation => "/api/mutation",
        }
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The relay could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The relay answered with a non-success HTTP status.
    #[error("http error: status {0}")]
    Http(u16),

    /// The call exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// The relay ran the function and reported an error.
    #[error("relay rejected call: {0}")]
    ServerRejected(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_) | TransportError::Http(_) | TransportError::Timeout
        )
    }
}

/// Transport trait for relay calls.
///
/// Implementations handle the underlying mechanism (HTTPS, mock, etc).
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Post one call to the given endpoint.
    async fn call(
        &self,
        endpoint: Endpoint,
        request: &RelayRequest,
    ) -> Result<RelayResponse, TransportError>;

    /// Point subsequent calls at another relay.
    ///
    /// Transports bound to a single backend may ignore this.
    fn retarget(&self, _relay_url: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths() {
        assert_eq!(Endpoint::Query.path(), "/api/query");
        assert_eq!(Endpoint::Mutation.path(), "/api/mutation");
    }

    #[test]
    fn transient_classification() {
        assert!(TransportError::Network("refused".into()).is_transient());
        assert!(TransportError::Http(503).is_transient());
        assert!(TransportError::Timeout.is_transient());
        assert!(!TransportError::ServerRejected("nope".into()).is_transient());
        assert!(!TransportError::MalformedResponse("eof".into()).is_transient());
    }
}
