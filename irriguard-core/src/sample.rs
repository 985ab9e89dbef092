//! Sample types for the ingestion pipeline
//!
//! ## Overview
//!
//! Two representations flow through the system:
//!
//! 1. [`RawSample`] — the wire shape. Every field is optional and may be
//!    malformed (numbers as strings, booleans as `"ON"`, timestamps in three
//!    different encodings). It deserializes from any JSON object without
//!    failing; coercion happens later.
//! 2. [`CanonicalSample`] — the validated, typed shape produced by
//!    [`SampleNormalizer`](crate::normalize::SampleNormalizer). Everything
//!    downstream (accounting, smoothing, anomaly rules) consumes only this.
//!
//! The split keeps the tolerance for messy upstreams in exactly one place:
//! a `CanonicalSample` is trustworthy by construction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Timestamp;

/// Untyped reading as it arrives from a push message or a pull response
///
/// Fields keep their raw JSON values so wrong-typed data can be coerced (or
/// dropped to `None`) by the normalizer instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSample {
    /// ISO-8601 string, epoch seconds, or epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Air temperature in °C
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Value>,
    /// Relative humidity in %
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<Value>,
    /// Soil moisture in %
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soil_moisture: Option<Value>,
    /// Pump actuator state: `true`, `"ON"`, or `1`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump_state: Option<Value>,
    /// Instantaneous flow in L/s
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_rate_lps: Option<Value>,
    /// Authoritative cumulative volume in liters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_total_liters: Option<Value>,
    /// Event embedded by the producer, re-emitted verbatim downstream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Value>,
}

impl RawSample {
    /// Decode a sample from a JSON payload
    ///
    /// Returns `None` when the payload is not a JSON object (or an array
    /// whose last element is not an object).
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        Self::from_value(&value)
    }

    /// Decode a sample from an already-parsed JSON value
    ///
    /// Batch responses arrive as arrays; only the most recent element is
    /// kept, matching the pull endpoint's "latest reading" contract.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = match value {
            Value::Array(items) => items.last()?,
            other => other,
        };
        if !obj.is_object() {
            return None;
        }
        serde_json::from_value(obj.clone()).ok()
    }

    /// Coerced pump state: boolean `true`, string `"ON"` (any case), or
    /// numeric `1`; everything else is off.
    pub fn pump_on(&self) -> bool {
        match &self.pump_state {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("on"),
            Some(Value::Number(n)) => n.as_f64() == Some(1.0),
            _ => false,
        }
    }

    pub(crate) fn number(field: &Option<Value>) -> Option<f64> {
        // Actual JSON numbers only; "23.5" the string stays out.
        field.as_ref().and_then(Value::as_f64)
    }
}

/// Producer-embedded event carried on a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNotification {
    /// Severity label: `"info"`, `"warning"`, or `"critical"`
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message
    pub message: String,
    /// Structured payload
    #[serde(default)]
    pub data: Value,
}

impl RawNotification {
    /// Lenient decode: missing or wrong-typed parts fall back to defaults
    /// rather than discarding the whole event.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            kind: obj
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("info")
                .to_string(),
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            data: obj.get("data").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Validated, typed reading produced by the normalizer
///
/// Invariant: `ts_millis` is strictly greater than every previously accepted
/// sample's `ts_millis` on the same stream. Samples violating this are
/// rejected by the normalizer and never constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalSample {
    /// Epoch milliseconds
    pub ts_millis: Timestamp,
    /// Seconds since the previous accepted sample, clamped to `[0, 1.0]`
    pub delta_seconds: f64,
    /// Air temperature in °C, if present and numeric
    pub temperature: Option<f64>,
    /// Relative humidity in %, if present and numeric
    pub humidity: Option<f64>,
    /// Soil moisture in %, if present and numeric
    pub soil_moisture: Option<f64>,
    /// Coerced pump state
    pub pump_on: bool,
    /// Instantaneous flow in L/s, if present and numeric
    pub flow_rate_lps: Option<f64>,
    /// Authoritative cumulative volume in liters, if present and numeric
    pub water_total_liters: Option<f64>,
    /// Embedded producer event, if any
    pub notification: Option<RawNotification>,
}
