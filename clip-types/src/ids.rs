//! Identity types for duoclip.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a device display name.
pub const MAX_DISPLAY_NAME_LEN: usize = 20;

/// A unique identifier for an installed device.
///
/// Random UUID v4, generated once per install. Never derived from hardware.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new random DeviceId.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an identifier received from the relay or a pairing payload.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.0.chars().take(8).collect();
        write!(f, "DeviceId({})", short)
    }
}

/// Identifier of a pairing document, assigned by the relay.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingId(String);

impl PairingId {
    /// Wrap a relay-assigned pairing id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PairingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingId({})", self.0)
    }
}

/// Identifier of a clipboard row, assigned by the relay.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wrap a relay-assigned item id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

/// Identity of this install: a stable id plus a user-facing name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable id, never changes after creation.
    pub device_id: DeviceId,
    /// Human-readable name shown to the paired device.
    pub display_name: String,
}

impl DeviceIdentity {
    /// Create a fresh identity with a random device id.
    pub fn generate(display_name: &str) -> Self {
        Self {
            device_id: DeviceId::random(),
            display_name: clamp_display_name(display_name),
        }
    }

    /// Replace the display name. The device id is untouched.
    pub fn rename(&mut self, display_name: &str) {
        self.display_name = clamp_display_name(display_name);
    }
}

/// Trim a display name and cap it at [`MAX_DISPLAY_NAME_LEN`] characters.
pub fn clamp_display_name(name: &str) -> String {
    name.trim().chars().take(MAX_DISPLAY_NAME_LEN).collect()
}
