//! Device activation against the fleet server
//!
//! Before a tracker may publish telemetry it must be activated over HTTP.
//! The server assigns the tracker to a fleet; the fleet number becomes the
//! broker registry id and the IMEI becomes the device id.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

/// Errors raised during device activation; all are fatal to startup
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("activation request failed")]
    Request(#[from] reqwest::Error),
    #[error("activation of tracker {imei} rejected with status {status}")]
    Rejected { imei: String, status: u16 },
    #[error("activation response missing fleet assignment")]
    MissingFleet,
}

/// Broker-scoped identity derived from a successful activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub registry_id: String,
    pub device_id: String,
}

/// Activate the tracker with the fleet server
///
/// Issues `PATCH {server}/api/trackers/{imei}` marking the tracker as
/// activated and remote. The server answers 201 with the fleet assignment;
/// any other status is fatal.
pub async fn activate(server_url: &str, imei: &str) -> Result<DeviceIdentity, ActivationError> {
    let body = json!({
        "data": {
            "type": "trackers",
            "id": imei,
            "attributes": {
                "activated": true,
                "remote": true,
            }
        }
    });

    let client = reqwest::Client::new();
    let response = client
        .patch(format!("{server_url}/api/trackers/{imei}"))
        .json(&body)
        .send()
        .await?;

    let status = response.status().as_u16();
    if status != 201 {
        return Err(ActivationError::Rejected {
            imei: imei.to_string(),
            status,
        });
    }

    let document: Value = response.json().await?;
    let fleet = document
        .pointer("/data/attributes/fleet")
        .and_then(fleet_label)
        .ok_or(ActivationError::MissingFleet)?;

    let identity = DeviceIdentity {
        registry_id: format!("fleet-{fleet}"),
        device_id: format!("tracker-{imei}"),
    };

    info!(
        registry_id = %identity.registry_id,
        device_id = %identity.device_id,
        "tracker activated"
    );
    Ok(identity)
}

/// The fleet field arrives as either a JSON number or a string depending on
/// the server version; normalize both.
fn fleet_label(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fleet_label_accepts_numbers_and_strings() {
        assert_eq!(fleet_label(&json!(7)), Some("7".to_string()));
        assert_eq!(fleet_label(&json!("north")), Some("north".to_string()));
        assert_eq!(fleet_label(&json!(null)), None);
        assert_eq!(fleet_label(&json!({"nested": true})), None);
    }
}
