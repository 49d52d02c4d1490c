use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};

/// Placeholder for missing identifiers and labels.
pub const UNKNOWN: &str = "unknown";

/// One normalized metrics report from a node.
///
/// All numeric fields are finite. `timestamp` is the ingestion time, never
/// the agent's own clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "node")]
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub mem: f64,
    pub net_in: f64,
    pub net_out: f64,
    pub status: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl Sample {
    pub fn new(source_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp,
            cpu: 0.0,
            mem: 0.0,
            net_in: 0.0,
            net_out: 0.0,
            status: UNKNOWN.to_string(),
            role: UNKNOWN.to_string(),
            extra: Map::new(),
        }
    }
}

/// Latest known state of a sub-component of a node, e.g. a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxEntry {
    pub name: String,
    pub cpu: f64,
    pub mem: f64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}
