//! Pure connection state and option handling for the device client
//!
//! Everything here is side-effect free: state definitions, broker option
//! construction, and topic/identity formatting.

use crate::activation::DeviceIdentity;
use crate::auth::Credential;
use crate::config::CloudSection;
use chrono::{DateTime, Utc};
use rumqttc::v5::MqttOptions;
use rumqttc::{TlsConfiguration, Transport as RumqttcTransport};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state of the device's broker session
///
/// Written exclusively by the background I/O task (on connect and
/// disconnect acknowledgments) and read by the scheduling sequence through
/// a watch channel, so the cross-context access is race-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("failed to read CA bundle {path}")]
    CaRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("no connect acknowledgment within {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },
    #[error("credential expired at {expires_at}")]
    CredentialExpired { expires_at: DateTime<Utc> },
    #[error("background I/O is not running")]
    IoNotRunning,
}

/// Build broker options for one connection attempt
///
/// The client identity is the full registry path; the broker ignores the
/// username and authenticates solely on the JWT passed as password. The
/// credential must still be valid at connect time.
pub fn configure_mqtt_options(
    identity: &DeviceIdentity,
    cloud: &CloudSection,
    credential: &Credential,
    keepalive_secs: u64,
) -> Result<MqttOptions, MqttError> {
    let now = Utc::now();
    if credential.is_expired(now) {
        return Err(MqttError::CredentialExpired {
            expires_at: credential.expires_at,
        });
    }

    let url = Url::parse(&cloud.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(cloud.broker_url.clone()))?;
    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(cloud.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let client_id = TopicBuilder::client_identity(&cloud.project_id, &cloud.region, identity);
    let mut options = MqttOptions::new(client_id, host, port);

    if url.scheme() == "mqtts" {
        let transport = match &cloud.ca_certs {
            Some(path) => {
                let ca = std::fs::read(path).map_err(|source| MqttError::CaRead {
                    path: path.display().to_string(),
                    source,
                })?;
                RumqttcTransport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                })
            }
            None => RumqttcTransport::tls_with_default_config(),
        };
        options.set_transport(transport);
    }

    options.set_credentials("unused", &credential.token);
    options.set_keep_alive(Duration::from_secs(keepalive_secs));

    Ok(options)
}

/// Identity and topic formatting for the broker's registry naming scheme
pub struct TopicBuilder;

impl TopicBuilder {
    /// `projects/{project}/locations/{region}/registries/{registry}/devices/{device}`
    pub fn client_identity(project_id: &str, region: &str, identity: &DeviceIdentity) -> String {
        format!(
            "projects/{project_id}/locations/{region}/registries/{}/devices/{}",
            identity.registry_id, identity.device_id
        )
    }

    /// Telemetry topic: `/devices/{device_id}/events`
    pub fn events_topic(device_id: &str) -> String {
        format!("/devices/{device_id}/events")
    }

    /// Configuration topic: `/devices/{device_id}/config`
    pub fn config_topic(device_id: &str) -> String {
        format!("/devices/{device_id}/config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn test_identity() -> DeviceIdentity {
        DeviceIdentity {
            registry_id: "fleet-7".to_string(),
            device_id: "tracker-12312312312".to_string(),
        }
    }

    fn test_cloud() -> CloudSection {
        CloudSection {
            project_id: "cloe-cloud".to_string(),
            region: "europe-west1".to_string(),
            broker_url: "mqtts://mqtt.googleapis.com:8883".to_string(),
            ca_certs: None,
        }
    }

    fn valid_credential() -> Credential {
        let now = Utc::now();
        Credential {
            issued_at: now,
            expires_at: now + ChronoDuration::minutes(60),
            token: "signed-token".to_string(),
        }
    }

    #[test]
    fn client_identity_is_the_full_registry_path() {
        let id = TopicBuilder::client_identity("cloe-cloud", "europe-west1", &test_identity());
        assert_eq!(
            id,
            "projects/cloe-cloud/locations/europe-west1/registries/fleet-7/devices/tracker-12312312312"
        );
    }

    #[test]
    fn topics_follow_the_device_naming_scheme() {
        assert_eq!(
            TopicBuilder::events_topic("tracker-12312312312"),
            "/devices/tracker-12312312312/events"
        );
        assert_eq!(
            TopicBuilder::config_topic("tracker-12312312312"),
            "/devices/tracker-12312312312/config"
        );
    }

    #[test]
    fn options_carry_credential_and_keepalive() {
        let options =
            configure_mqtt_options(&test_identity(), &test_cloud(), &valid_credential(), 20)
                .unwrap();

        assert_eq!(options.keep_alive(), Duration::from_secs(20));
        let (username, password) = options.credentials().unwrap();
        assert_eq!(username, "unused");
        assert_eq!(password, "signed-token");
    }

    #[test]
    fn expired_credential_fails_before_any_network_io() {
        let now = Utc::now();
        let credential = Credential {
            issued_at: now - ChronoDuration::minutes(61),
            expires_at: now - ChronoDuration::minutes(1),
            token: "stale".to_string(),
        };

        let result = configure_mqtt_options(&test_identity(), &test_cloud(), &credential, 20);
        assert!(matches!(result, Err(MqttError::CredentialExpired { .. })));
    }

    #[test]
    fn invalid_broker_url_is_rejected() {
        let mut cloud = test_cloud();
        cloud.broker_url = "not a url".to_string();

        let result = configure_mqtt_options(&test_identity(), &cloud, &valid_credential(), 20);
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn default_port_depends_on_scheme() {
        let mut cloud = test_cloud();
        cloud.broker_url = "mqtt://localhost".to_string();
        let options =
            configure_mqtt_options(&test_identity(), &cloud, &valid_credential(), 20).unwrap();
        assert_eq!(options.broker_address().1, 1883);

        cloud.broker_url = "mqtts://localhost".to_string();
        let options =
            configure_mqtt_options(&test_identity(), &cloud, &valid_credential(), 20).unwrap();
        assert_eq!(options.broker_address().1, 8883);
    }

    #[test]
    fn missing_ca_bundle_is_an_error() {
        let mut cloud = test_cloud();
        cloud.ca_certs = Some("/nonexistent/roots.pem".into());

        let result = configure_mqtt_options(&test_identity(), &cloud, &valid_credential(), 20);
        assert!(matches!(result, Err(MqttError::CaRead { .. })));
    }
}
