//! Top-level error type for the tracker simulator
//!
//! Fatal errors bubble up to the driver, which attempts a best-effort
//! disconnect and exits non-zero. Broker protocol-level results (connect
//! return codes, subscribe grants) are logged and reflected into connection
//! state rather than raised here.

use crate::activation::ActivationError;
use crate::auth::SigningError;
use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Aggregate error for tracker operations
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("activation error: {0}")]
    Activation(#[from] ActivationError),

    #[error("transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("telemetry encoding failed")]
    TelemetryEncode(#[source] serde_json::Error),
}

impl TrackerError {
    /// Whether this error is a connect-wait timeout; the scheduler aborts
    /// the run on these instead of retrying indefinitely.
    pub fn is_connect_timeout(&self) -> bool {
        matches!(self, TrackerError::Transport(MqttError::ConnectTimeout { .. }))
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
