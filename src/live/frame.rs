//! Live stream frame decoding.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

/// Latest-known values of the metric feed, keyed by metric name.
pub type Metrics = Map<String, Value>;

/// Frame type carrying a metric update.
pub const STATS_UPDATE: &str = "stats_update";

/// A decoded stream frame.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveFrame {
    /// Metric delta to merge into the latest-known values
    Stats(Metrics),
    /// Well-formed frame of a type this client does not handle
    Ignored(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(flatten)]
    rest: Metrics,
}

/// Decodes one line of the stream.
///
/// A `stats_update` delta is read from `data` when present, otherwise from
/// the remaining top-level fields.
pub fn parse_frame(line: &str) -> Result<LiveFrame> {
    let raw: RawFrame = serde_json::from_str(line)?;
    if raw.kind != STATS_UPDATE {
        return Ok(LiveFrame::Ignored(raw.kind));
    }

    match raw.data {
        Some(Value::Object(delta)) => Ok(LiveFrame::Stats(delta)),
        Some(other) => Err(SyncError::MalformedPayload(format!(
            "stats_update data must be an object, got {}",
            json_kind(&other)
        ))),
        None => Ok(LiveFrame::Stats(raw.rest)),
    }
}

/// Overwrites every metric present in `delta`.
pub fn apply_delta(metrics: &mut Metrics, delta: Metrics) {
    for (name, value) in delta {
        metrics.insert(name, value);
    }
}

/// Reads a full metrics payload returned by the pull endpoint.
pub fn metrics_from_value(value: Value) -> Result<Metrics> {
    match value {
        Value::Object(metrics) => Ok(metrics),
        other => Err(SyncError::MalformedPayload(format!(
            "metrics payload must be an object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
