//! Device identity persistence.

use crate::store::{StateCell, StoreError};
use clip_types::DeviceIdentity;

/// Load this install's identity, creating and persisting one on first run.
pub async fn load_or_create(
    cell: &StateCell,
    default_name: &str,
) -> Result<DeviceIdentity, StoreError> {
    let state = cell.load().await?;
    if let Some(identity) = state.identity {
        return Ok(identity);
    }

    let state = cell
        .update(|s| {
            if s.identity.is_none() {
                s.identity = Some(DeviceIdentity::generate(default_name));
            }
        })
        .await?;
    let identity = state
        .identity
        .ok_or_else(|| StoreError::WriteFailed("identity was not persisted".into()))?;
    tracing::info!("Created device identity {}", identity.device_id);
    Ok(identity)
}

/// Change the display name. The device id never changes.
pub async fn rename(cell: &StateCell, display_name: &str) -> Result<DeviceIdentity, StoreError> {
    let state = cell
        .update(|s| {
            let identity = s
                .identity
                .get_or_insert_with(|| DeviceIdentity::generate(display_name));
            identity.rename(display_name);
        })
        .await?;
    state
        .identity
        .ok_or_else(|| StoreError::WriteFailed("identity was not persisted".into()))
}
