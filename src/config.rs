//! Tracker configuration
//!
//! All deployment-fixed values (project, region, broker address, key paths,
//! publish cadence) live in one immutable TOML-backed structure built once
//! at startup and passed to each component's constructor.

use crate::auth::SigningAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    pub device: DeviceSection,
    pub cloud: CloudSection,
    pub activation: ActivationSection,
    pub auth: AuthSection,
    pub telemetry: TelemetrySection,
}

/// Identity of the simulated tracker hardware
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Tracker IMEI (digits only)
    pub imei: String,
}

/// Cloud project and broker endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloudSection {
    /// Cloud project id; also the JWT audience
    pub project_id: String,
    /// Cloud region, e.g. "europe-west1"
    pub region: String,
    /// Broker URL, e.g. "mqtts://mqtt.googleapis.com:8883"
    pub broker_url: String,
    /// Optional CA bundle for the TLS session; system roots when absent
    pub ca_certs: Option<PathBuf>,
}

/// Fleet server used for one-time device activation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivationSection {
    pub server_url: String,
}

/// Credential signing settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSection {
    pub private_key_path: PathBuf,
    #[serde(default = "default_algorithm")]
    pub algorithm: SigningAlgorithm,
    /// Token validity window (default: 60 minutes)
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: u64,
}

/// Publish loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// Number of telemetry messages to publish before shutting down
    pub message_count: u32,
    /// Seconds the radio sleeps between transmissions (default: 10)
    #[serde(default = "default_publish_interval_secs")]
    pub publish_interval_secs: u64,
    /// Bound on waiting for a connect acknowledgment (default: 5)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_algorithm() -> SigningAlgorithm {
    SigningAlgorithm::Rs256
}

fn default_token_ttl_minutes() -> u64 {
    60
}

fn default_publish_interval_secs() -> u64 {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid IMEI: {0}")]
    InvalidImei(String),
}

impl TrackerConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: TrackerConfig = toml::from_str(&content)?;
        validate_imei(&config.device.imei)?;
        Ok(config)
    }

    /// Broker keepalive: twice the publish interval, so the broker tolerates
    /// exactly one suspended sleep between control packets.
    pub fn keepalive_secs(&self) -> u64 {
        self.telemetry.publish_interval_secs * 2
    }

    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
imei = "12312312312"

[cloud]
project_id = "test-project"
region = "europe-west1"
broker_url = "mqtts://mqtt.example.com:8883"

[activation]
server_url = "http://fleet.example.com"

[auth]
private_key_path = "./rsa_private.pem"
algorithm = "hs256"

[telemetry]
message_count = 3
"#;
        toml::from_str(toml_content).expect("test config should parse")
    }
}

/// IMEIs are decimal digit strings; anything else indicates a broken
/// provisioning pipeline and is rejected up front.
fn validate_imei(imei: &str) -> Result<(), ConfigError> {
    if imei.is_empty() || !imei.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidImei(format!(
            "IMEI '{imei}' must be a non-empty digit string"
        )));
    }
    Ok(())
}
