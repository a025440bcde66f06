//! Pure routing of broker events
//!
//! The background I/O task polls the rumqttc event loop and hands each
//! event through [`route_event`]; the routing decision itself is a pure
//! function so the lifecycle transitions can be tested without a broker.

use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;

/// Reserved SUBACK code signalling a rejected subscription
const SUBACK_FAILURE: u8 = 0x80;

/// Routing decision for one broker event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// CONNACK received with its return code; the session is live
    ConnectionAcknowledged { code: String },
    /// Broker-initiated DISCONNECT
    Disconnected,
    /// SUBACK with the granted QoS codes
    SubscriptionConfirmed { granted: Vec<u8> },
    /// PUBLISH delivered on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Keepalive traffic and other protocol chatter
    Infrastructure,
    /// Outgoing packet echo; handled by the event loop itself
    Outgoing,
}

/// Classify a broker event into a routing decision
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                code: format!("{:?}", connack.code),
            },
            Packet::Disconnect(_) => EventRoute::Disconnected,
            Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                granted: suback
                    .return_codes
                    .iter()
                    .map(|code| match code {
                        SubscribeReasonCode::Success(qos) => *qos as u8,
                        _ => SUBACK_FAILURE,
                    })
                    .collect(),
            },
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.to_vec(),
            },
            _ => EventRoute::Infrastructure,
        },
        Event::Outgoing(_) => EventRoute::Outgoing,
    }
}

/// Check SUBACK grants; a reserved 0x80 code means the broker refused the
/// subscription. Logged by the caller, never raised as an error.
pub fn subscription_granted(granted: &[u8]) -> Result<(), String> {
    if granted.iter().any(|&code| code >= SUBACK_FAILURE) {
        Err(format!("subscription refused with grant codes {granted:?}"))
    } else {
        Ok(())
    }
}
