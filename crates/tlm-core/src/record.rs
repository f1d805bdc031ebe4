//! Measurement records

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tlm_stream::{Encoding, SecurityTier};

/// Record payload as interpreted for the consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "data")]
pub enum Payload {
    /// Decoded JSON document
    Json(Value),
    /// Undecoded bytes
    Raw(Vec<u8>),
}

/// One telemetry record received on a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Arrival sequence number within the subscription, from 1
    pub seq: u64,
    /// Tier the record arrived on
    pub tier: SecurityTier,
    /// Device timestamp, epoch milliseconds
    pub msg_timestamp: Option<i64>,
    /// Sensor path the record was collected from
    pub encoding_path: Option<String>,
    /// Payload
    pub payload: Payload,
}

impl MeasurementRecord {
    /// Interpret raw stream bytes
    ///
    /// JSON-encoded records that fail to parse are kept as raw bytes.
    #[must_use]
    pub fn decode(seq: u64, tier: SecurityTier, encoding: Encoding, bytes: Vec<u8>) -> Self {
        let payload = match encoding {
            Encoding::Json => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Payload::Json(value),
                Err(err) => {
                    tracing::debug!(seq, error = %err, "record is not valid JSON, keeping raw bytes");
                    Payload::Raw(bytes)
                }
            },
            Encoding::GpbKeyValue | Encoding::Gpb => Payload::Raw(bytes),
        };
        let (msg_timestamp, encoding_path) = match &payload {
            Payload::Json(value) => (
                value.get("msg_timestamp").and_then(Value::as_i64),
                value
                    .get("encoding_path")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            ),
            Payload::Raw(_) => (None, None),
        };
        Self {
            seq,
            tier,
            msg_timestamp,
            encoding_path,
            payload,
        }
    }

    /// Display label: `[HH:MM:SS] <encoding_path>` (UTC)
    #[must_use]
    pub fn label(&self) -> String {
        let time = self
            .msg_timestamp
            .and_then(DateTime::from_timestamp_millis)
            .map_or_else(|| "--:--:--".to_string(), |t| t.format("%H:%M:%S").to_string());
        let path = self.encoding_path.as_deref().unwrap_or("<unknown path>");
        format!("[{time}] {path}")
    }

    /// Decoded JSON document, if any
    #[inline]
    #[must_use]
    pub fn json(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }
}
