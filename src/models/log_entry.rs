use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One audited prediction: the inputs the model saw and the probability it produced.
///
/// Messages on the durable queue are JSON arrays of these. Field names on the wire
/// are shared with the downstream analytics tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "inputs")]
    pub input_features: Map<String, Value>,
    #[serde(rename = "prediction_prob")]
    pub prediction_probability: f64,
    #[serde(rename = "model_name")]
    pub model_identifier: String,
}

impl LogEntry {
    /// Serialize a batch of entries into a single message body
    pub fn encode_batch(entries: &[LogEntry]) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(entries)
    }

    /// Parse a message body back into its entries
    pub fn decode_batch(body: &[u8]) -> serde_json::Result<Vec<LogEntry>> {
        serde_json::from_slice(body)
    }
}

mod rfc3339 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .or_else(|_| {
                // Naive ISO timestamps (no offset) are treated as UTC
                chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| naive.and_utc())
            })
            .map_err(serde::de::Error::custom)
    }
}
