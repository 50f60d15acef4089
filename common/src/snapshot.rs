use serde_json::{Map, Value};
use thiserror::Error;

use crate::{fetch::FetchOutcome, sensor::SensorReading};

pub const TEMPERATURE_KEY: &str = "temperature";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("upstream status fetch failed")]
    Upstream,
    #[error("upstream document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("upstream document is not a JSON object")]
    NotAnObject,
}

/// Merges the current sensor reading into the upstream status object under
/// `temperature`. Any existing key of that name is replaced.
pub fn merge_reading(body: &str, reading: SensorReading) -> Result<Map<String, Value>, SnapshotError> {
    let Value::Object(mut doc) = serde_json::from_str::<Value>(body)? else {
        return Err(SnapshotError::NotAnObject);
    };

    doc.insert(TEMPERATURE_KEY.to_string(), serde_json::to_value(reading)?);
    Ok(doc)
}

/// Serialized body for the data endpoint, or the reason it cannot be built.
pub fn build_snapshot(fetch: &FetchOutcome, reading: SensorReading) -> Result<String, SnapshotError> {
    let body = fetch.body().ok_or(SnapshotError::Upstream)?;
    let doc = merge_reading(body, reading)?;
    Ok(serde_json::to_string(&doc)?)
}
