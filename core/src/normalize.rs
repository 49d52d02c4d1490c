//! Coercion of untyped agent payloads into [`Sample`]s.
//!
//! Individual fields are repaired rather than rejected: a missing node name
//! becomes `"unknown"`, a number that does not parse becomes `0.0`. Only a
//! payload that is not a JSON object at all is refused.

use crate::{
    error::{
        Error,
        Result,
    },
    sample::{
        AuxEntry,
        Sample,
        UNKNOWN,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use serde_json::{
    Map,
    Value,
};

const SOURCE_KEYS: &[&str] = &["node", "source_id", "source"];
const CONTAINERS_KEY: &str = "containers";

/// Decimal places used when a value leaves the process (sink, display).
pub const PERCENT_PRECISION: u32 = 2;
pub const RATE_PRECISION: u32 = 3;

/// Keys consumed into typed [`Sample`] fields, everything else lands in
/// `extra`.
const SAMPLE_KEYS: &[&str] = &[
    "node",
    "source_id",
    "source",
    "cpu",
    "mem",
    "memory",
    "net_in",
    "net_out",
    "status",
    "role",
    "timestamp",
    CONTAINERS_KEY,
];

const AUX_KEYS: &[&str] = &["name", "cpu", "mem", "memory", "status"];

/// A sample plus the container breakdown that came with it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub sample: Sample,
    pub containers: Option<Vec<AuxEntry>>,
}

/// Normalize one inbound record, stamping it with `now`.
pub fn normalize_record(raw: &Value, now: DateTime<Utc>) -> Result<NormalizedRecord> {
    let object = raw
        .as_object()
        .ok_or_else(|| Error::invalid_payload("expected a JSON object"))?;

    let source_id = source_id(object);
    let containers = match object.get(CONTAINERS_KEY) {
        None | Some(Value::Null) => None,
        Some(value) => match normalize_containers(value) {
            Ok(containers) => Some(containers),
            Err(err) => {
                debug!(node = %source_id, %err, "ignoring containers on metrics record");
                None
            }
        },
    };

    let extra = object
        .iter()
        .filter(|(key, _)| !SAMPLE_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let sample = Sample {
        source_id,
        timestamp: now,
        cpu: number(object.get("cpu")),
        mem: number(object.get("mem").or_else(|| object.get("memory"))),
        net_in: number(object.get("net_in")),
        net_out: number(object.get("net_out")),
        status: label(object.get("status")),
        role: label(object.get("role")),
        extra,
    };

    Ok(NormalizedRecord { sample, containers })
}

/// Normalize a container breakdown. Entries that are not objects are
/// skipped; a value that is not an array is refused here, while
/// [`normalize_record`] drops it and keeps the sample.
pub fn normalize_containers(raw: &Value) -> Result<Vec<AuxEntry>> {
    let entries = raw
        .as_array()
        .ok_or_else(|| Error::invalid_payload("expected `containers` to be an array"))?;

    Ok(entries
        .iter()
        .filter_map(Value::as_object)
        .map(|object| AuxEntry {
            name: label(object.get("name")),
            cpu: number(object.get("cpu")),
            mem: number(object.get("mem").or_else(|| object.get("memory"))),
            status: label(object.get("status")),
            extra: object
                .iter()
                .filter(|(key, _)| !AUX_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        })
        .collect())
}

/// Read the node name from the first recognised key.
pub(crate) fn source_id(object: &Map<String, Value>) -> String {
    SOURCE_KEYS
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn label(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

/// Round to `decimals` places. Non-finite input maps to zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(decimals as i32);
    let rounded = (value * factor).round() / factor;
    if rounded.is_finite() {
        rounded
    } else {
        value
    }
}
