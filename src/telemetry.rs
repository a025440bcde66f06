//! Telemetry records and the opaque record source
//!
//! The publish payload is a JSON array of position records. Where the
//! records come from is outside the connection machinery's concern; the
//! scheduler only sees the [`TelemetrySource`] trait.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One telemetry record in the shape the fleet server ingests
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub attributes: PositionAttributes,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionAttributes {
    /// "lat,lon" decimal degrees
    pub geo_point: String,
    /// ISO-8601 timestamp with microsecond precision
    pub created_on: String,
}

impl PositionRecord {
    pub fn position(geo_point: impl Into<String>, created_on: DateTime<Utc>) -> Self {
        Self {
            record_type: "positions".to_string(),
            attributes: PositionAttributes {
                geo_point: geo_point.into(),
                created_on: created_on
                    .to_rfc3339_opts(SecondsFormat::Micros, false)
                    .trim_end_matches("+00:00")
                    .to_string(),
            },
        }
    }
}

/// Serialize a batch of records into a publish payload
pub fn encode_payload(records: &[PositionRecord]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(records)
}

/// Source of telemetry records, one batch per publish iteration
pub trait TelemetrySource: Send {
    fn next_records(&mut self) -> Vec<PositionRecord>;
}

/// Simulated source reporting a fixed position with fresh timestamps
#[derive(Debug, Clone)]
pub struct SimulatedPositions {
    geo_point: String,
}

impl SimulatedPositions {
    pub fn new() -> Self {
        Self {
            geo_point: "12.86578817,2.36269871".to_string(),
        }
    }

    pub fn at(geo_point: impl Into<String>) -> Self {
        Self {
            geo_point: geo_point.into(),
        }
    }
}

impl Default for SimulatedPositions {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for SimulatedPositions {
    fn next_records(&mut self) -> Vec<PositionRecord> {
        vec![PositionRecord::position(self.geo_point.clone(), Utc::now())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_serializes_to_fleet_server_shape() {
        let created_on = Utc.with_ymd_and_hms(2017, 12, 12, 19, 47, 35).unwrap();
        let record = PositionRecord::position("12.86578817,2.36269871", created_on);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "positions",
                "attributes": {
                    "geo_point": "12.86578817,2.36269871",
                    "created_on": "2017-12-12T19:47:35.000000",
                }
            })
        );
    }

    #[test]
    fn payload_is_a_json_array_of_records() {
        let created_on = Utc.with_ymd_and_hms(2017, 12, 12, 19, 47, 35).unwrap();
        let records = vec![
            PositionRecord::position("1.0,2.0", created_on),
            PositionRecord::position("3.0,4.0", created_on),
        ];

        let payload = encode_payload(&records).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(decoded.is_array());
        assert_eq!(decoded.as_array().unwrap().len(), 2);
    }

    #[test]
    fn simulated_source_produces_a_record_per_call() {
        let mut source = SimulatedPositions::new();
        let first = source.next_records();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].record_type, "positions");
        assert_eq!(first[0].attributes.geo_point, "12.86578817,2.36269871");
    }
}
