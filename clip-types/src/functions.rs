//! Names of the relay functions this client calls.

/// Create a pairing. Args: `androidDeviceId`, `androidDeviceName`,
/// `macDeviceId`, `macDeviceName`. Returns the pairing id.
pub const PAIRING_CREATE: &str = "pairings:create";

/// Delete a pairing. Args: `pairingId`.
pub const PAIRING_REMOVE: &str = "pairings:remove";

/// Check whether a pairing still exists. Args: `pairingId`. Returns a bool.
pub const PAIRING_EXISTS: &str = "pairings:exists";

/// Latest pairing naming a host created after a timestamp.
/// Args: `macDeviceId`, `sinceTimestamp` (ms). Returns a pairing or null.
pub const PAIRING_WATCH: &str = "pairings:watchForPairing";

/// Upload an encrypted clipboard row. Args: `pairingId`, `content`,
/// `sourceDeviceId`, `type`. Returns the row id.
pub const CLIPBOARD_SEND: &str = "clipboard:send";

/// Latest clipboard row of a pairing. Args: `pairingId`. Returns a row or null.
pub const CLIPBOARD_LATEST: &str = "clipboard:getLatest";

/// Delete every clipboard row of a pairing. Args: `pairingId`. Returns the count.
pub const CLIPBOARD_CLEAR: &str = "clipboard:clear";
