//! Documents stored by the relay.
//!
//! Field names follow the deployed backend schema, so the serde renames
//! here are part of the wire contract. Device A is the host (the side that
//! shows the pairing code), device B is the joiner.

use crate::ids::{DeviceId, ItemId, PairingId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a pairing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairingStatus {
    /// Pairing is live.
    Active,
    /// Any status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl Default for PairingStatus {
    fn default() -> Self {
        Self::Active
    }
}

/// A pairing between two devices, as returned by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingRecord {
    /// Relay-assigned id.
    #[serde(rename = "_id")]
    pub pairing_id: PairingId,
    /// Server creation time (ms since epoch).
    #[serde(rename = "_creationTime", default)]
    pub creation_time: f64,
    /// Host device id.
    #[serde(rename = "macDeviceId")]
    pub device_a_id: DeviceId,
    /// Host display name.
    #[serde(rename = "macDeviceName", default)]
    pub device_a_name: String,
    /// Joiner device id.
    #[serde(rename = "androidDeviceId")]
    pub device_b_id: DeviceId,
    /// Joiner display name.
    #[serde(rename = "androidDeviceName", default)]
    pub device_b_name: String,
    /// Pairing status.
    #[serde(default)]
    pub status: PairingStatus,
    /// Client-reported creation time (ms since epoch).
    #[serde(rename = "createdAt", default)]
    pub created_at: f64,
}

impl PairingRecord {
    /// Check whether this record references the given device on either side.
    pub fn involves(&self, device: &DeviceId) -> bool {
        &self.device_a_id == device || &self.device_b_id == device
    }

    /// The id and name of the other side, seen from `me`.
    ///
    /// Returns `None` when `me` is not part of the pairing.
    pub fn counterpart_of(&self, me: &DeviceId) -> Option<(&DeviceId, &str)> {
        if &self.device_a_id == me {
            Some((&self.device_b_id, &self.device_b_name))
        } else if &self.device_b_id == me {
            Some((&self.device_a_id, &self.device_a_name))
        } else {
            None
        }
    }
}

/// Kind of clipboard payload. Only text is synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// UTF-8 text.
    Text,
}

impl Default for ContentKind {
    fn default() -> Self {
        Self::Text
    }
}

/// An immutable clipboard row on the relay.
///
/// `ciphertext` is the base64 encoding of `nonce || ciphertext || tag`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipboardEnvelope {
    /// Relay-assigned id.
    #[serde(rename = "_id")]
    pub item_id: ItemId,
    /// Server creation time (ms since epoch). Latest wins.
    #[serde(rename = "_creationTime", default)]
    pub created_at: f64,
    /// Encrypted content, base64 encoded.
    #[serde(rename = "content")]
    pub ciphertext: String,
    /// Pairing this row belongs to.
    #[serde(rename = "pairingId")]
    pub pairing_id: PairingId,
    /// Device that uploaded the row.
    #[serde(rename = "sourceDeviceId")]
    pub source_device_id: DeviceId,
    /// Payload kind.
    #[serde(rename = "type", default)]
    pub kind: ContentKind,
}

impl std::fmt::Debug for ClipboardEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardEnvelope")
            .field("item_id", &self.item_id)
            .field("created_at", &self.created_at)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("pairing_id", &self.pairing_id)
            .field("source_device_id", &self.source_device_id)
            .field("kind", &self.kind)
            .finish()
    }
}
