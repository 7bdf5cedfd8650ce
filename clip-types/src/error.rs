//! Error types for the duoclip wire format.

use thiserror::Error;

/// Errors decoding relay traffic.
#[derive(Debug, Error)]
pub enum WireError {
    /// The relay answered with `status: "error"`.
    #[error("relay rejected call: {0}")]
    Rejected(String),

    /// A value did not have the expected shape.
    #[error("malformed relay value: {0}")]
    Malformed(#[from] serde_json::Error),
}
