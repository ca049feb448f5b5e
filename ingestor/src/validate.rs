use crate::db::Store;
use crate::errors::{Error, Result};
use crate::model::{Datastream, Device};

/// Resolves and authorizes the device behind an inbound message.
pub async fn validate_device(store: &dyn Store, device_id: &str) -> Result<Device> {
    let device = store
        .device(device_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("device {}", device_id)))?;

    if device.auth_token.is_none() {
        return Err(Error::Unauthorized(format!(
            "device {} credential revoked",
            device_id
        )));
    }

    Ok(device)
}

/// Resolves the datastream declared for `pin` on the device's template.
pub async fn validate_datastream(
    store: &dyn Store,
    template_id: &str,
    pin: &str,
) -> Result<Datastream> {
    store.datastream(template_id, pin).await?.ok_or_else(|| {
        Error::NotFound(format!("datastream {} on template {}", pin, template_id))
    })
}
