//! Mock implementations for testing
//!
//! `MockTransport` records every transport call in order, so scheduler tests
//! can assert the exact lifecycle sequence a run produces.

use crate::auth::Credential;
use crate::transport::mqtt::{ConnectionState, MqttError, TopicBuilder};
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One recorded transport invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect {
        token: String,
        expires_at: DateTime<Utc>,
        keepalive_secs: u64,
    },
    WaitForConnection {
        timeout_secs: u64,
    },
    SubscribeConfig {
        topic: String,
    },
    Publish {
        topic: String,
        payload: Vec<u8>,
        qos: u8,
    },
    Suspend,
    Resume,
    Disconnect,
}

/// Mock transport recording calls in order
#[derive(Debug)]
pub struct MockTransport {
    device_id: String,
    calls: Arc<Mutex<Vec<TransportCall>>>,
    state: Arc<std::sync::Mutex<ConnectionState>>,
    /// When false, `wait_for_connection` times out as if no CONNACK arrived
    connack: bool,
    /// When true, `suspend` drops the session like a broker keepalive kill
    drop_on_suspend: bool,
}

impl MockTransport {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            calls: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(std::sync::Mutex::new(ConnectionState::Disconnected)),
            connack: true,
            drop_on_suspend: false,
        }
    }

    /// Never deliver a CONNACK; `wait_for_connection` will time out.
    pub fn without_connack(device_id: impl Into<String>) -> Self {
        Self {
            connack: false,
            ..Self::new(device_id)
        }
    }

    /// Drop the session on every suspend, forcing a reconnect next cycle.
    pub fn dropping_on_suspend(device_id: impl Into<String>) -> Self {
        Self {
            drop_on_suspend: true,
            ..Self::new(device_id)
        }
    }

    /// Shared handle to the recorded call log
    pub fn calls(&self) -> Arc<Mutex<Vec<TransportCall>>> {
        self.calls.clone()
    }

    pub async fn get_calls(&self) -> Vec<TransportCall> {
        self.calls.lock().await.clone()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(
        &mut self,
        credential: &Credential,
        keepalive_secs: u64,
    ) -> Result<(), Self::Error> {
        self.calls.lock().await.push(TransportCall::Connect {
            token: credential.token.clone(),
            expires_at: credential.expires_at,
            keepalive_secs,
        });
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    async fn wait_for_connection(&mut self, timeout_secs: u64) -> Result<(), Self::Error> {
        self.calls
            .lock()
            .await
            .push(TransportCall::WaitForConnection { timeout_secs });
        if self.connack {
            self.set_state(ConnectionState::Connected);
            Ok(())
        } else {
            Err(MqttError::ConnectTimeout { timeout_secs })
        }
    }

    async fn subscribe_config(&mut self) -> Result<(), Self::Error> {
        self.calls.lock().await.push(TransportCall::SubscribeConfig {
            topic: TopicBuilder::config_topic(&self.device_id),
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error> {
        let state = *self.state.lock().unwrap();
        if state != ConnectionState::Connected {
            return Err(MqttError::NotConnected { state });
        }
        self.calls.lock().await.push(TransportCall::Publish {
            topic: topic.to_string(),
            payload,
            qos: qos as u8,
        });
        Ok(())
    }

    async fn suspend(&mut self) -> Result<(), Self::Error> {
        self.calls.lock().await.push(TransportCall::Suspend);
        if self.drop_on_suspend {
            self.set_state(ConnectionState::Disconnected);
        }
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), Self::Error> {
        self.calls.lock().await.push(TransportCall::Resume);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.calls.lock().await.push(TransportCall::Disconnect);
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }
}
