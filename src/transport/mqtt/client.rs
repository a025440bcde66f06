//! Managed MQTT session for one tracker device
//!
//! Owns the rumqttc client and event loop, runs the background I/O task,
//! and exposes the suspend/resume machinery that emulates the device
//! powering its radio down between transmissions.
//!
//! Connection state flows one way: the background task is the only writer
//! of the state watch channel (it reacts to CONNACK/DISCONNECT), while the
//! scheduling sequence reads it. Suspend/resume never touch the state - a
//! suspended device is still logically connected.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, TopicBuilder};
use super::event::{route_event, subscription_granted, EventRoute};
use crate::activation::DeviceIdentity;
use crate::auth::Credential;
use crate::config::CloudSection;
use crate::listener::ConfigListener;
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct DeviceClient {
    identity: DeviceIdentity,
    cloud: CloudSection,
    listener: Arc<ConfigListener>,
    client: Option<AsyncClient>,
    event_loop: Option<Arc<Mutex<EventLoop>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    halt_tx: Option<watch::Sender<bool>>,
    io_handle: Option<JoinHandle<()>>,
}

impl DeviceClient {
    pub fn new(identity: DeviceIdentity, cloud: CloudSection, listener: ConfigListener) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            identity,
            cloud,
            listener: Arc::new(listener),
            client: None,
            event_loop: None,
            state_tx,
            state_rx,
            halt_tx: None,
            io_handle: None,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Spawn the background I/O task over the retained event loop.
    /// Returns once the task has signalled it is processing, so a publish
    /// issued right after cannot be silently dropped.
    async fn spawn_io_task(&mut self) -> Result<(), MqttError> {
        let event_loop = self.event_loop.clone().ok_or(MqttError::IoNotRunning)?;
        let (halt_tx, mut halt_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();
        let state_tx = self.state_tx.clone();
        let listener = self.listener.clone();
        let config_topic = TopicBuilder::config_topic(&self.identity.device_id);
        let device_id = self.identity.device_id.clone();

        let handle = tokio::spawn(async move {
            let _ = ready_tx.send(());
            loop {
                tokio::select! {
                    _ = halt_rx.changed() => {
                        if *halt_rx.borrow() {
                            break;
                        }
                    }
                    polled = async {
                        let mut event_loop = event_loop.lock().await;
                        event_loop.poll().await
                    } => {
                        match polled {
                            Ok(event) => match route_event(&event) {
                                EventRoute::ConnectionAcknowledged { code } => {
                                    info!(%device_id, %code, "broker acknowledged connection");
                                    let _ = state_tx.send(ConnectionState::Connected);
                                }
                                EventRoute::Disconnected => {
                                    warn!(%device_id, "broker closed the connection");
                                    let _ = state_tx.send(ConnectionState::Disconnected);
                                }
                                EventRoute::SubscriptionConfirmed { granted } => {
                                    match subscription_granted(&granted) {
                                        Ok(()) => debug!(%device_id, ?granted, "subscription granted"),
                                        Err(reason) => warn!(%device_id, %reason, "subscription refused"),
                                    }
                                }
                                EventRoute::MessageReceived { topic, payload } => {
                                    if topic == config_topic {
                                        listener.handle_payload(&payload).await;
                                    } else {
                                        debug!(%device_id, %topic, "message on unexpected topic ignored");
                                    }
                                }
                                EventRoute::Infrastructure | EventRoute::Outgoing => {}
                            },
                            Err(error) => {
                                warn!(%device_id, %error, "event loop error, marking disconnected");
                                let _ = state_tx.send(ConnectionState::Disconnected);
                                // Back off so a dead link does not spin the task.
                                tokio::time::sleep(Duration::from_millis(250)).await;
                            }
                        }
                    }
                }
            }
            debug!(%device_id, "background I/O task stopped");
        });

        self.halt_tx = Some(halt_tx);
        self.io_handle = Some(handle);
        ready_rx
            .await
            .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;
        Ok(())
    }

    /// Signal the background task to stop and wait until it has.
    async fn halt_io_task(&mut self) {
        if let Some(halt_tx) = self.halt_tx.take() {
            let _ = halt_tx.send(true);
        }
        if let Some(mut handle) = self.io_handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "background I/O task ended with error");
                }
                Err(_) => {
                    warn!("background I/O task did not stop in time, aborting");
                    handle.abort();
                    let _ = handle.await;
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Transport for DeviceClient {
    type Error = MqttError;

    async fn connect(
        &mut self,
        credential: &Credential,
        keepalive_secs: u64,
    ) -> Result<(), Self::Error> {
        // A stale task from a dropped session must not outlive its client.
        self.halt_io_task().await;

        let options =
            configure_mqtt_options(&self.identity, &self.cloud, credential, keepalive_secs)?;
        let (client, event_loop) = AsyncClient::new(options, 10);
        self.client = Some(client);
        self.event_loop = Some(Arc::new(Mutex::new(event_loop)));

        let _ = self.state_tx.send(ConnectionState::Connecting);
        self.spawn_io_task().await?;

        info!(
            device_id = %self.identity.device_id,
            keepalive_secs,
            "connection initiated"
        );
        Ok(())
    }

    async fn wait_for_connection(&mut self, timeout_secs: u64) -> Result<(), Self::Error> {
        let mut state_rx = self.state_rx.clone();
        if *state_rx.borrow() == ConnectionState::Connected {
            return Ok(());
        }

        let wait = async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "state channel closed".to_string().into(),
                    ));
                }
                if *state_rx.borrow() == ConnectionState::Connected {
                    return Ok(());
                }
            }
        };

        match tokio::time::timeout(Duration::from_secs(timeout_secs), wait).await {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectTimeout { timeout_secs }),
        }
    }

    async fn subscribe_config(&mut self) -> Result<(), Self::Error> {
        let client = self.client.as_ref().ok_or(MqttError::NotConnected {
            state: *self.state_rx.borrow(),
        })?;

        let topic = TopicBuilder::config_topic(&self.identity.device_id);
        client
            .subscribe(&topic, QoS::AtMostOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        info!(%topic, "subscribed to configuration topic");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error> {
        let state = *self.state_rx.borrow();
        if state != ConnectionState::Connected {
            return Err(MqttError::NotConnected { state });
        }
        let client = self
            .client
            .as_ref()
            .ok_or(MqttError::NotConnected { state })?;

        client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(%topic, "telemetry published");
        Ok(())
    }

    async fn suspend(&mut self) -> Result<(), Self::Error> {
        if self.io_handle.is_none() {
            return Err(MqttError::IoNotRunning);
        }
        self.halt_io_task().await;
        debug!(device_id = %self.identity.device_id, "background I/O suspended");
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), Self::Error> {
        self.spawn_io_task().await?;
        debug!(device_id = %self.identity.device_id, "background I/O resumed");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        if let Some(client) = self.client.take() {
            // The event loop must still be polling to flush the DISCONNECT;
            // after a suspend (e.g. on an error path) bring it back first.
            if self.io_handle.is_none() && self.event_loop.is_some() {
                self.spawn_io_task().await?;
            }
            if let Err(e) = client.disconnect().await {
                warn!(error = %e, "clean disconnect failed");
            }
        }

        self.halt_io_task().await;
        self.event_loop = None;
        let _ = self.state_tx.send(ConnectionState::Disconnected);

        info!(device_id = %self.identity.device_id, "disconnected");
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }
}

impl Drop for DeviceClient {
    fn drop(&mut self) {
        if let Some(halt_tx) = &self.halt_tx {
            let _ = halt_tx.send(true);
        }
        if let Some(handle) = self.io_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ConfigListener;
    use chrono::{Duration as ChronoDuration, Utc};
    use tokio::sync::mpsc;

    fn test_client() -> DeviceClient {
        let identity = DeviceIdentity {
            registry_id: "fleet-7".to_string(),
            device_id: "tracker-12312312312".to_string(),
        };
        let cloud = CloudSection {
            project_id: "test-project".to_string(),
            region: "europe-west1".to_string(),
            broker_url: "mqtt://localhost:1883".to_string(),
            ca_certs: None,
        };
        let (config_tx, _config_rx) = mpsc::channel(4);
        let listener = ConfigListener::new(identity.device_id.clone(), config_tx);
        DeviceClient::new(identity, cloud, listener)
    }

    fn valid_credential() -> Credential {
        let now = Utc::now();
        Credential {
            issued_at: now,
            expires_at: now + ChronoDuration::minutes(60),
            token: "token".to_string(),
        }
    }

    #[test]
    fn starts_disconnected() {
        let client = test_client();
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn publish_is_refused_while_disconnected() {
        let client = test_client();
        let result = client
            .publish("/devices/tracker-12312312312/events", vec![], QoS::AtMostOnce)
            .await;
        assert!(matches!(
            result,
            Err(MqttError::NotConnected {
                state: ConnectionState::Disconnected
            })
        ));
    }

    // Paused time fast-forwards through the join timeout.
    #[tokio::test(start_paused = true)]
    async fn suspend_tears_down_a_task_that_ignores_the_halt_signal() {
        use std::sync::atomic::{AtomicBool, Ordering};

        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let mut client = test_client();

        // A task wedged in an await never observes the halt signal; the
        // drop flag only fires once the task's future is torn down.
        let torn_down = Arc::new(AtomicBool::new(false));
        let guard = DropFlag(torn_down.clone());
        let (halt_tx, _halt_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        client.halt_tx = Some(halt_tx);
        client.io_handle = Some(handle);

        client.suspend().await.unwrap();

        // A resumed session must not contend with a leftover poll loop.
        assert!(client.io_handle.is_none());
        assert!(torn_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn suspend_without_running_io_is_an_error() {
        let mut client = test_client();
        assert!(matches!(client.suspend().await, Err(MqttError::IoNotRunning)));
    }

    #[tokio::test]
    async fn connect_does_not_block_for_an_acknowledgment() {
        let mut client = test_client();
        client.connect(&valid_credential(), 20).await.unwrap();
        // No broker is listening, so the session can only be pending or
        // already failed, never acknowledged.
        assert_ne!(client.connection_state(), ConnectionState::Connected);
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_connection_times_out_without_connack() {
        let mut client = test_client();
        client.connect(&valid_credential(), 20).await.unwrap();

        // No broker is listening, so no CONNACK ever arrives.
        let result = client.wait_for_connection(1).await;
        assert!(matches!(
            result,
            Err(MqttError::ConnectTimeout { timeout_secs: 1 })
        ));
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_connection_returns_once_connack_is_observed() {
        let mut client = test_client();
        client.connect(&valid_credential(), 20).await.unwrap();

        // Simulate the background task observing a CONNACK.
        let state_tx = client.state_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        client.wait_for_connection(5).await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn suspend_stops_and_resume_restarts_background_io() {
        let mut client = test_client();
        client.connect(&valid_credential(), 20).await.unwrap();
        assert!(client.io_handle.is_some());

        client.suspend().await.unwrap();
        assert!(client.io_handle.is_none());

        client.resume().await.unwrap();
        assert!(client.io_handle.is_some());

        client.disconnect().await.unwrap();
        assert!(client.io_handle.is_none());
    }

    #[tokio::test]
    async fn expired_credential_fails_connect() {
        let mut client = test_client();
        let now = Utc::now();
        let stale = Credential {
            issued_at: now - ChronoDuration::minutes(120),
            expires_at: now - ChronoDuration::minutes(60),
            token: "stale".to_string(),
        };

        let result = client.connect(&stale, 20).await;
        assert!(matches!(result, Err(MqttError::CredentialExpired { .. })));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_a_no_op() {
        let mut client = test_client();
        assert!(client.disconnect().await.is_ok());
    }
}
