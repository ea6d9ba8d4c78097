use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::StackError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Traces, Signal::Metrics, Signal::Logs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        }
    }

    pub fn export_path(&self) -> String {
        format!("/v1/{}", self.as_str())
    }

    /// Leading byte of a framed record.
    pub fn code(&self) -> u8 {
        match self {
            Signal::Traces => 0,
            Signal::Metrics => 1,
            Signal::Logs => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|signal| signal.code() == code)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "traces" | "trace" => Ok(Signal::Traces),
            "metrics" | "metric" => Ok(Signal::Metrics),
            "logs" | "log" => Ok(Signal::Logs),
            other => Err(StackError::Telemetry(format!("Unknown signal: {}", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Framed,
    Http,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum RecordBody {
    Json(serde_json::Value),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl RecordBody {
    /// JSON if the bytes parse as JSON, raw otherwise.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) => RecordBody::Json(value),
            Err(_) => RecordBody::Binary(bytes.to_vec()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordBody::Json(value) => value.to_string().len(),
            RecordBody::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub signal: Signal,
    pub source: RecordSource,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub body: RecordBody,
}

impl TelemetryRecord {
    pub fn new(signal: Signal, source: RecordSource, body: RecordBody) -> Self {
        Self {
            signal,
            source,
            received_at: Utc::now(),
            attributes: BTreeMap::new(),
            body,
        }
    }

    /// Fixed tags win over attributes the sender already set.
    pub fn apply_tags(&mut self, tags: &BTreeMap<String, String>) {
        for (key, value) in tags {
            self.attributes.insert(key.clone(), value.clone());
        }
    }

    pub fn has_tags(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.iter()
            .all(|(key, value)| self.attributes.get(key) == Some(value))
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
