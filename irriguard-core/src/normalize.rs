//! Sample normalization: the single entry gate for all inbound readings
//!
//! Every reading — push or pull, hardware or synthetic — passes through
//! [`SampleNormalizer`] before any other component sees it. The normalizer
//! owns three decisions:
//!
//! - **Timestamp detection**: textual values are parsed as calendar
//!   date-times; numeric values below 1e12 are epoch seconds, otherwise
//!   epoch milliseconds; anything else falls back to the current instant.
//! - **Monotonicity**: a sample whose timestamp is not strictly greater than
//!   the last accepted one is rejected and counted, which makes duplicate or
//!   reordered delivery from overlapping transports idempotent.
//! - **Delta clamping**: `delta_seconds` is capped at 1.0 so a long gap
//!   (backgrounded process, transport outage) is never integrated as if flow
//!   had been continuous the whole time.
//!
//! Malformed input never raises an error; fields degrade to `None` and only
//! the ordering rule can reject a sample outright.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::sample::{CanonicalSample, RawNotification, RawSample};

/// Numeric timestamps below this are interpreted as epoch seconds
const EPOCH_SECONDS_CUTOFF: f64 = 1e12;

/// Upper bound for `delta_seconds`
const MAX_DELTA_SECONDS: f64 = 1.0;

/// Counters exposed by [`SampleNormalizer::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NormalizerStats {
    /// Samples accepted in arrival order
    pub accepted: u64,
    /// Samples rejected for violating timestamp monotonicity
    pub dropped: u64,
    /// Timestamp of the most recently accepted sample
    pub last_ts_millis: Option<Timestamp>,
}

/// Converts raw readings into canonical samples, enforcing ordering
pub struct SampleNormalizer {
    clock: Arc<dyn Clock>,
    last_ts_millis: Option<Timestamp>,
    accepted: u64,
    dropped: u64,
}

impl Default for SampleNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleNormalizer {
    /// Create a normalizer using the system wall clock for fallbacks
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a normalizer with an explicit time source
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_ts_millis: None,
            accepted: 0,
            dropped: 0,
        }
    }

    /// Normalize one raw reading
    ///
    /// Returns `None` when the sample is rejected for being out of order;
    /// the rejection is counted, not raised.
    pub fn normalize(&mut self, raw: &RawSample) -> Option<CanonicalSample> {
        let ts_millis = self.resolve_timestamp(&raw.timestamp);

        if let Some(last) = self.last_ts_millis {
            if ts_millis <= last {
                self.dropped += 1;
                log::debug!(
                    "dropping out-of-order sample: ts {} <= last accepted {}",
                    ts_millis,
                    last
                );
                return None;
            }
        }

        let delta_seconds = match self.last_ts_millis {
            Some(last) => (((ts_millis - last) as f64) / 1000.0).clamp(0.0, MAX_DELTA_SECONDS),
            None => 0.0,
        };

        self.last_ts_millis = Some(ts_millis);
        self.accepted += 1;

        Some(CanonicalSample {
            ts_millis,
            delta_seconds,
            temperature: RawSample::number(&raw.temperature),
            humidity: RawSample::number(&raw.humidity),
            soil_moisture: RawSample::number(&raw.soil_moisture),
            pump_on: raw.pump_on(),
            flow_rate_lps: RawSample::number(&raw.flow_rate_lps),
            water_total_liters: RawSample::number(&raw.water_total_liters),
            notification: raw
                .notification
                .as_ref()
                .and_then(RawNotification::from_value),
        })
    }

    /// Accepted/dropped counters and the last accepted timestamp
    pub fn stats(&self) -> NormalizerStats {
        NormalizerStats {
            accepted: self.accepted,
            dropped: self.dropped,
            last_ts_millis: self.last_ts_millis,
        }
    }

    /// Forget ordering state and counters (new logical stream)
    pub fn reset(&mut self) {
        self.last_ts_millis = None;
        self.accepted = 0;
        self.dropped = 0;
    }

    fn resolve_timestamp(&self, value: &Option<Value>) -> Timestamp {
        match value {
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() && v >= 0.0 => {
                    if v < EPOCH_SECONDS_CUTOFF {
                        (v * 1000.0) as Timestamp
                    } else {
                        v as Timestamp
                    }
                }
                _ => self.clock.now(),
            },
            Some(Value::String(s)) => parse_datetime(s).unwrap_or_else(|| self.clock.now()),
            _ => self.clock.now(),
        }
    }
}

/// Parse a calendar timestamp, RFC 3339 first, then common naive layouts
/// (treated as UTC, matching the producers in the field).
fn parse_datetime(s: &str) -> Option<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        let ms = dt.timestamp_millis();
        return (ms >= 0).then_some(ms as Timestamp);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            let ms = naive.and_utc().timestamp_millis();
            return (ms >= 0).then_some(ms as Timestamp);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;

    fn normalizer_at(now: Timestamp) -> SampleNormalizer {
        SampleNormalizer::with_clock(Arc::new(FixedClock::new(now)))
    }

    fn raw_with_ts(ts: Value) -> RawSample {
        RawSample {
            timestamp: Some(ts),
            ..Default::default()
        }
    }

    #[test]
    fn epoch_seconds_are_scaled() {
        let mut n = normalizer_at(0);
        let c = n.normalize(&raw_with_ts(json!(1_700_000_000))).unwrap();
        assert_eq!(c.ts_millis, 1_700_000_000_000);
    }

    #[test]
    fn epoch_millis_pass_through() {
        let mut n = normalizer_at(0);
        let c = n.normalize(&raw_with_ts(json!(1_700_000_000_123u64))).unwrap();
        assert_eq!(c.ts_millis, 1_700_000_000_123);
    }

    #[test]
    fn iso_string_is_parsed() {
        let mut n = normalizer_at(0);
        let c = n
            .normalize(&raw_with_ts(json!("2025-09-16T10:47:04.846Z")))
            .unwrap();
        assert_eq!(c.ts_millis, 1_758_019_624_846);
    }

    #[test]
    fn unparseable_timestamp_uses_clock() {
        let mut n = normalizer_at(42_000);
        let c = n.normalize(&raw_with_ts(json!("not a date"))).unwrap();
        assert_eq!(c.ts_millis, 42_000);

        let mut n = normalizer_at(43_000);
        let c = n.normalize(&RawSample::default()).unwrap();
        assert_eq!(c.ts_millis, 43_000);
    }

    #[test]
    fn out_of_order_samples_are_rejected_and_counted() {
        let mut n = normalizer_at(0);
        assert!(n.normalize(&raw_with_ts(json!(2_000_000_000_000u64))).is_some());
        // Duplicate
        assert!(n.normalize(&raw_with_ts(json!(2_000_000_000_000u64))).is_none());
        // Older
        assert!(n.normalize(&raw_with_ts(json!(1_999_999_999_000u64))).is_none());
        // Newer again
        assert!(n.normalize(&raw_with_ts(json!(2_000_000_001_000u64))).is_some());

        let stats = n.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.last_ts_millis, Some(2_000_000_001_000));
    }

    #[test]
    fn delta_is_zero_for_first_sample_and_clamped_after() {
        let mut n = normalizer_at(0);
        let first = n.normalize(&raw_with_ts(json!(2_000_000_000_000u64))).unwrap();
        assert_eq!(first.delta_seconds, 0.0);

        // 500 ms later
        let second = n.normalize(&raw_with_ts(json!(2_000_000_000_500u64))).unwrap();
        assert!((second.delta_seconds - 0.5).abs() < 1e-9);

        // An hour later: clamped to the 1 s ceiling
        let third = n.normalize(&raw_with_ts(json!(2_000_003_600_500u64))).unwrap();
        assert_eq!(third.delta_seconds, 1.0);
    }

    #[test]
    fn malformed_fields_degrade_to_none() {
        let mut n = normalizer_at(1_000);
        let raw = RawSample {
            timestamp: Some(json!(2_000_000_000_000u64)),
            temperature: Some(json!("23.5")),
            humidity: Some(json!(null)),
            soil_moisture: Some(json!([1, 2])),
            pump_state: Some(json!("banana")),
            flow_rate_lps: Some(json!(0.4)),
            water_total_liters: None,
            notification: Some(json!(17)),
        };
        let c = n.normalize(&raw).unwrap();
        assert_eq!(c.temperature, None);
        assert_eq!(c.humidity, None);
        assert_eq!(c.soil_moisture, None);
        assert!(!c.pump_on);
        assert_eq!(c.flow_rate_lps, Some(0.4));
        assert!(c.notification.is_none());
    }

    #[test]
    fn embedded_notification_is_carried() {
        let mut n = normalizer_at(0);
        let raw = RawSample {
            timestamp: Some(json!(2_000_000_000_000u64)),
            notification: Some(json!({
                "type": "warning",
                "message": "Low soil moisture: 18%",
                "data": {"soil_moisture": 18.0}
            })),
            ..Default::default()
        };
        let c = n.normalize(&raw).unwrap();
        let notif = c.notification.unwrap();
        assert_eq!(notif.kind, "warning");
        assert_eq!(notif.message, "Low soil moisture: 18%");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Accepted timestamps are strictly increasing and every delta
            /// stays inside [0, 1] no matter how hostile the input order is.
            #[test]
            fn ordering_and_delta_invariants(timestamps in proptest::collection::vec(0u64..4_000_000_000_000, 1..64)) {
                let mut n = normalizer_at(0);
                let mut last_accepted: Option<u64> = None;

                for ts in timestamps {
                    if let Some(c) = n.normalize(&raw_with_ts(json!(ts))) {
                        if let Some(prev) = last_accepted {
                            prop_assert!(c.ts_millis > prev);
                        }
                        prop_assert!(c.delta_seconds >= 0.0);
                        prop_assert!(c.delta_seconds <= 1.0);
                        last_accepted = Some(c.ts_millis);
                    }
                }
            }
        }
    }
}
