//! Relay HTTP envelope.
//!
//! Every call is a POST of [`RelayRequest`] to `/api/query` or
//! `/api/mutation`; the relay answers with a [`RelayResponse`].

use crate::error::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a query or mutation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    /// Function name, e.g. `clipboard:getLatest`.
    pub path: String,
    /// Function arguments (a JSON object).
    pub args: Value,
    /// Response encoding. Always `"json"`.
    pub format: String,
}

impl RelayRequest {
    /// Build a JSON-format request for `path`.
    pub fn new(path: impl Into<String>, args: Value) -> Self {
        Self {
            path: path.into(),
            args,
            format: "json".into(),
        }
    }
}

/// Outcome reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The function ran.
    Success,
    /// The function failed; see `errorMessage`.
    Error,
}

/// Body returned by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayResponse {
    /// Success or error.
    pub status: ResponseStatus,
    /// Return value of the function (may be `null`).
    #[serde(default)]
    pub value: Option<Value>,
    /// Server-side error description.
    #[serde(rename = "errorMessage", default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RelayResponse {
    /// A success response carrying `value`.
    pub fn success(value: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            value: Some(value),
            error_message: None,
        }
    }

    /// An error response carrying `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            value: None,
            error_message: Some(message.into()),
        }
    }

    /// Unwrap the envelope. `null` values become `None`.
    pub fn into_result(self) -> Result<Option<Value>, WireError> {
        match self.status {
            ResponseStatus::Success => Ok(self.value.filter(|v| !v.is_null())),
            ResponseStatus::Error => Err(WireError::Rejected(
                self.error_message
                    .unwrap_or_else(|| "Unknown error".to_string()),
            )),
        }
    }
}
