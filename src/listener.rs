//! Inbound configuration handling
//!
//! The broker delivers the device's latest configuration on the config
//! topic right after subscription, and again whenever it changes. An empty
//! payload means "no configuration present". Decoded documents are handed
//! to an external sink; persistence is not this crate's concern.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A decoded configuration document received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub document: Value,
}

/// Decodes config-topic payloads and forwards them to the sink
#[derive(Debug)]
pub struct ConfigListener {
    device_id: String,
    sink: mpsc::Sender<ConfigUpdate>,
}

impl ConfigListener {
    pub fn new(device_id: impl Into<String>, sink: mpsc::Sender<ConfigUpdate>) -> Self {
        Self {
            device_id: device_id.into(),
            sink,
        }
    }

    /// Handle one inbound config payload. Never fails: malformed documents
    /// are logged and dropped, keeping the I/O loop alive.
    pub async fn handle_payload(&self, payload: &[u8]) {
        match decode(payload) {
            Ok(None) => {
                debug!(device_id = %self.device_id, "empty config payload, no configuration present");
            }
            Ok(Some(document)) => {
                info!(device_id = %self.device_id, "configuration received");
                if self.sink.send(ConfigUpdate { document }).await.is_err() {
                    warn!(device_id = %self.device_id, "config sink closed, update dropped");
                }
            }
            Err(error) => {
                warn!(
                    device_id = %self.device_id,
                    %error,
                    "malformed config payload ignored"
                );
            }
        }
    }
}

/// Decode a config payload: `None` for the empty "no configuration"
/// convention, `Some` for a parsed document.
pub fn decode(payload: &[u8]) -> Result<Option<Value>, serde_json::Error> {
    if payload.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(payload).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_payload_decodes_to_none() {
        assert_eq!(decode(b"").unwrap(), None);
    }

    #[test]
    fn well_formed_document_round_trips() {
        let document = json!({"reporting_interval": 30, "fleet": "north"});
        let payload = serde_json::to_vec(&document).unwrap();
        assert_eq!(decode(&payload).unwrap(), Some(document));
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        assert!(decode(b"{not json").is_err());
    }

    #[tokio::test]
    async fn listener_forwards_decoded_documents() {
        let (tx, mut rx) = mpsc::channel(4);
        let listener = ConfigListener::new("tracker-123", tx);

        let document = json!({"reporting_interval": 30});
        listener
            .handle_payload(&serde_json::to_vec(&document).unwrap())
            .await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.document, document);
    }

    #[tokio::test]
    async fn listener_ignores_empty_and_malformed_payloads() {
        let (tx, mut rx) = mpsc::channel(4);
        let listener = ConfigListener::new("tracker-123", tx);

        listener.handle_payload(b"").await;
        listener.handle_payload(b"%%%").await;

        // Nothing should have been forwarded.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_sink_does_not_fail_the_listener() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let listener = ConfigListener::new("tracker-123", tx);

        // Must not panic or error.
        listener.handle_payload(br#"{"a":1}"#).await;
    }
}
