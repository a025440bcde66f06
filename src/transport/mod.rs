//! Transport layer for the tracker's broker connection
//!
//! Provides the transport abstraction the scheduler runs against and the
//! MQTT implementation behind it.

use crate::auth::Credential;
use rumqttc::v5::mqttbytes::QoS;

pub mod mqtt;

/// Managed-connection operations the publish scheduler depends on
///
/// Abstracting the MQTT client behind a trait lets the scheduler be tested
/// against a mock without a broker.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Initiate the TLS session and start the background I/O loop.
    /// Non-blocking; transitions state to Connecting.
    async fn connect(
        &mut self,
        credential: &Credential,
        keepalive_secs: u64,
    ) -> Result<(), Self::Error>;

    /// Block until the broker acknowledges the connection or the timeout
    /// elapses.
    async fn wait_for_connection(&mut self, timeout_secs: u64) -> Result<(), Self::Error>;

    /// Subscribe to the device's config topic at QoS 0.
    async fn subscribe_config(&mut self) -> Result<(), Self::Error>;

    /// Publish a telemetry payload; errors unless currently Connected.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error>;

    /// Stop background I/O without closing the session. Guarantees the
    /// background context has fully stopped before returning.
    async fn suspend(&mut self) -> Result<(), Self::Error>;

    /// Restart background I/O after a suspend. Guarantees the background
    /// context is processing before returning.
    async fn resume(&mut self) -> Result<(), Self::Error>;

    /// Clean disconnect; stops background processing permanently.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Current connection state as observed by the background I/O context.
    fn connection_state(&self) -> mqtt::ConnectionState;
}

/// Type alias for the MQTT transport
pub type MqttTransport = mqtt::DeviceClient;
