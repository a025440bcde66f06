//! MQTT implementation of the transport layer
//!
//! Split by effect: `connection` and `event` are pure (options, topics,
//! state, event routing), `client` owns the rumqttc session and the
//! background I/O task.

mod client;
mod connection;
mod event;

pub use client::DeviceClient;
pub use connection::{configure_mqtt_options, ConnectionState, MqttError, TopicBuilder};
pub use event::{route_event, subscription_granted, EventRoute};
