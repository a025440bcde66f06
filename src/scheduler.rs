//! Publish scheduling
//!
//! Drives the device's duty cycle: establish a session when there is none,
//! publish one telemetry batch, suspend the radio for the publish interval,
//! resume, repeat for the configured message count, then disconnect.
//!
//! The scheduler re-checks connection state before every publish and
//! re-establishes with a fresh credential when the held one has expired, so
//! a broker-side disconnect mid-run heals on the next iteration.

use crate::auth::{Credential, CredentialIssuer};
use crate::config::TelemetrySection;
use crate::error::{TrackerError, TrackerResult};
use crate::telemetry::{encode_payload, TelemetrySource};
use crate::transport::mqtt::{ConnectionState, TopicBuilder};
use crate::transport::Transport;
use chrono::Utc;
use rumqttc::v5::mqttbytes::QoS;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PublishScheduler<T, S> {
    transport: T,
    source: S,
    issuer: CredentialIssuer,
    device_id: String,
    telemetry: TelemetrySection,
    keepalive_secs: u64,
    credential: Option<Credential>,
}

impl<T, S> PublishScheduler<T, S>
where
    T: Transport,
    T::Error: Into<TrackerError>,
    S: TelemetrySource,
{
    pub fn new(
        transport: T,
        source: S,
        issuer: CredentialIssuer,
        device_id: impl Into<String>,
        telemetry: TelemetrySection,
    ) -> Self {
        // Keepalive spans two publish intervals, so the session survives
        // exactly one suspended sleep between control packets.
        let keepalive_secs = telemetry.publish_interval_secs * 2;
        Self {
            transport,
            source,
            issuer,
            device_id: device_id.into(),
            telemetry,
            keepalive_secs,
            credential: None,
        }
    }

    /// Run the full publish cycle, then disconnect regardless of outcome.
    pub async fn run(mut self) -> TrackerResult<()> {
        let outcome = self.run_iterations().await;

        if let Err(error) = self.transport.disconnect().await {
            let error: TrackerError = error.into();
            warn!(%error, "disconnect after run failed");
        }

        outcome
    }

    async fn run_iterations(&mut self) -> TrackerResult<()> {
        let events_topic = TopicBuilder::events_topic(&self.device_id);
        let interval = Duration::from_secs(self.telemetry.publish_interval_secs);

        info!(
            device_id = %self.device_id,
            message_count = self.telemetry.message_count,
            publish_interval_secs = self.telemetry.publish_interval_secs,
            "starting publish cycle"
        );

        for iteration in 1..=self.telemetry.message_count {
            let records = self.source.next_records();
            let payload = encode_payload(&records).map_err(TrackerError::TelemetryEncode)?;

            if self.transport.connection_state() != ConnectionState::Connected {
                self.establish().await?;
            }

            self.transport
                .publish(&events_topic, payload, QoS::AtMostOnce)
                .await
                .map_err(Into::into)?;
            info!(
                iteration,
                of = self.telemetry.message_count,
                records = records.len(),
                "telemetry batch published"
            );

            self.transport.suspend().await.map_err(Into::into)?;
            debug!(sleep_secs = self.telemetry.publish_interval_secs, "radio sleeping");
            tokio::time::sleep(interval).await;
            self.transport.resume().await.map_err(Into::into)?;
        }

        Ok(())
    }

    /// Bring up a session: mint a credential if the held one is missing or
    /// expired, connect, wait for the acknowledgment, subscribe for config.
    async fn establish(&mut self) -> TrackerResult<()> {
        let credential = match self.credential.take() {
            Some(credential) if !credential.is_expired(Utc::now()) => credential,
            _ => self.issuer.issue()?,
        };

        self.transport
            .connect(&credential, self.keepalive_secs)
            .await
            .map_err(Into::into)?;
        self.credential = Some(credential);

        self.transport
            .wait_for_connection(self.telemetry.connect_timeout_secs)
            .await
            .map_err(Into::into)?;

        self.transport.subscribe_config().await.map_err(Into::into)?;

        info!(device_id = %self.device_id, "session established");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SigningAlgorithm;
    use crate::testing::mocks::{MockTransport, TransportCall};
    use crate::telemetry::PositionRecord;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct FixedSource;

    impl TelemetrySource for FixedSource {
        fn next_records(&mut self) -> Vec<PositionRecord> {
            vec![PositionRecord::position("1.0,2.0", Utc::now())]
        }
    }

    fn secret_key_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"scheduler-test-secret").unwrap();
        file.flush().unwrap();
        file
    }

    fn test_issuer(key: &NamedTempFile) -> CredentialIssuer {
        CredentialIssuer::new("test-project", key.path(), SigningAlgorithm::Hs256, 60)
    }

    fn fast_telemetry(message_count: u32) -> TelemetrySection {
        TelemetrySection {
            message_count,
            publish_interval_secs: 0,
            connect_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn keepalive_is_twice_the_interval() {
        let key = secret_key_file();
        let transport = MockTransport::new("tracker-1");
        let telemetry = TelemetrySection {
            message_count: 1,
            publish_interval_secs: 15,
            connect_timeout_secs: 1,
        };
        let scheduler = PublishScheduler::new(
            transport,
            FixedSource,
            test_issuer(&key),
            "tracker-1",
            telemetry,
        );
        assert_eq!(scheduler.keepalive_secs, 30);
    }

    #[tokio::test]
    async fn session_is_established_once_when_it_stays_up() {
        let key = secret_key_file();
        let transport = MockTransport::new("tracker-1");
        let calls = transport.calls();

        let scheduler = PublishScheduler::new(
            transport,
            FixedSource,
            test_issuer(&key),
            "tracker-1",
            fast_telemetry(2),
        );
        scheduler.run().await.unwrap();

        let recorded = calls.lock().await;
        let connects = recorded
            .iter()
            .filter(|c| matches!(c, TransportCall::Connect { .. }))
            .count();
        assert_eq!(connects, 1);
    }
}
