//! Shared secret and pairing payload for duoclip.
//!
//! This module provides:
//! - [`SharedSecret`] generation and hex encoding
//! - [`HandshakePayload`] encoding/decoding for the QR code
//! - Tolerant parsing of older payload field names
//!
//! The pairing flow:
//! 1. The host generates a SharedSecret once and shows a HandshakePayload as a QR code
//! 2. The joiner scans it and creates the pairing record on the relay
//! 3. Both devices now share the SharedSecret for E2E encryption

use clip_types::{DeviceId, DeviceIdentity};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the shared secret in bytes.
pub const SECRET_LEN: usize = 32;

/// Display name used when a payload does not carry one.
pub const DEFAULT_COUNTERPART_NAME: &str = "Mac";

/// Error type for pairing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    /// The payload is not usable (bad JSON, missing device id).
    InvalidPayload(String),
    /// The secret is not 64 hex characters.
    InvalidSecret(String),
    /// The payload has no secret and no legacy key is configured.
    MissingSecret,
    /// The OS random source failed.
    Entropy(String),
}

impl std::fmt::Display for PairingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingError::InvalidPayload(msg) => write!(f, "invalid pairing payload: {}", msg),
            PairingError::InvalidSecret(msg) => write!(f, "invalid shared secret: {}", msg),
            PairingError::MissingSecret => write!(f, "pairing payload carries no secret"),
            PairingError::Entropy(msg) => write!(f, "random source failed: {}", msg),
        }
    }
}

impl std::error::Error for PairingError {}

/// A 32-byte symmetric secret shared by the two paired devices.
///
/// Used directly as the AES-256-GCM key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SECRET_LEN]);

impl SharedSecret {
    /// Generate a new random secret.
    pub fn random() -> Result<Self, PairingError> {
        let mut bytes = [0u8; SECRET_LEN];
        getrandom::getrandom(&mut bytes).map_err(|e| PairingError::Entropy(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse 64 hex characters (either case).
    pub fn from_hex(text: &str) -> Result<Self, PairingError> {
        let text = text.trim();
        if text.len() != SECRET_LEN * 2 {
            return Err(PairingError::InvalidSecret(format!(
                "expected {} hex characters, got {}",
                SECRET_LEN * 2,
                text.len()
            )));
        }
        let mut bytes = [0u8; SECRET_LEN];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|e| PairingError::InvalidSecret(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Uppercase hex, the form carried in pairing payloads.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

// Intentionally opaque debug to avoid logging secrets
impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// Where a joiner's secret came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Carried in the payload.
    Payload,
    /// Payload had none; the deprecated legacy key was used.
    LegacyDefault,
}

/// Payload shown by the host as a QR code and scanned by the joiner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePayload {
    /// Host device id.
    pub device_id: DeviceId,
    /// Host display name.
    pub device_name: String,
    /// Shared secret. `None` only for payloads from old hosts.
    pub secret: Option<SharedSecret>,
    /// Relay the host talks to.
    pub relay_url: Option<String>,
}

/// JSON form written by this version.
#[derive(Serialize)]
struct RawPayload<'a> {
    #[serde(rename = "deviceId")]
    device_id: &'a str,
    #[serde(rename = "deviceName")]
    device_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    #[serde(rename = "relayUrl", skip_serializing_if = "Option::is_none")]
    relay_url: Option<&'a str>,
}

/// JSON form as scanned. Older hosts wrote other field names, sometimes
/// alongside the current ones, so each name is read separately.
#[derive(Deserialize)]
struct ScannedPayload {
    #[serde(rename = "deviceId", default)]
    device_id: Option<String>,
    #[serde(rename = "macId", default)]
    mac_id: Option<String>,
    #[serde(rename = "deviceName", default)]
    device_name: Option<String>,
    #[serde(rename = "macDeviceName", default)]
    mac_device_name: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(rename = "relayUrl", default)]
    relay_url: Option<String>,
    #[serde(rename = "convexUrl", default)]
    convex_url: Option<String>,
    #[serde(default)]
    server: Option<String>,
}

/// First value that is non-empty after trimming.
fn first_present<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

impl HandshakePayload {
    /// Build the payload a host displays.
    pub fn new(identity: &DeviceIdentity, secret: SharedSecret, relay_url: &str) -> Self {
        Self {
            device_id: identity.device_id.clone(),
            device_name: identity.display_name.clone(),
            secret: Some(secret),
            relay_url: Some(relay_url.to_string()),
        }
    }

    /// Encode as the JSON text embedded in the QR code.
    pub fn to_qr_payload(&self) -> String {
        let raw = RawPayload {
            device_id: self.device_id.as_str(),
            device_name: &self.device_name,
            secret: self.secret.as_ref().map(SharedSecret::to_hex),
            relay_url: self.relay_url.as_deref(),
        };
        // A struct of strings always serializes.
        serde_json::to_string(&raw).unwrap_or_default()
    }

    /// Decode a scanned payload.
    ///
    /// Unknown fields are ignored. A missing device id, or a secret that is
    /// present but malformed, rejects the payload rather than guessing.
    pub fn from_qr_payload(text: &str) -> Result<Self, PairingError> {
        let raw: ScannedPayload = serde_json::from_str(text.trim())
            .map_err(|e| PairingError::InvalidPayload(format!("json parse: {}", e)))?;

        let device_id = first_present([raw.device_id, raw.mac_id])
            .ok_or_else(|| PairingError::InvalidPayload("missing device id".into()))?;

        // An empty secret means the host had none to share.
        let secret = match first_present([raw.secret]) {
            Some(hex) => Some(SharedSecret::from_hex(&hex)?),
            None => None,
        };

        let device_name = first_present([raw.device_name, raw.mac_device_name])
            .unwrap_or_else(|| DEFAULT_COUNTERPART_NAME.to_string());

        let relay_url = first_present([raw.relay_url, raw.convex_url, raw.server])
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        Ok(Self {
            device_id: DeviceId::new(device_id),
            device_name,
            secret,
            relay_url,
        })
    }

    /// Pick the secret to use after scanning.
    ///
    /// Falls back to `legacy` only when the payload carries no secret.
    pub fn resolve_secret(
        &self,
        legacy: Option<&SharedSecret>,
    ) -> Result<(SharedSecret, SecretSource), PairingError> {
        match (&self.secret, legacy) {
            (Some(secret), _) => Ok((secret.clone(), SecretSource::Payload)),
            (None, Some(legacy)) => Ok((legacy.clone(), SecretSource::LegacyDefault)),
            (None, None) => Err(PairingError::MissingSecret),
        }
    }
}
