//! Core ingestion engine for Irriguard
//!
//! Turns a stream of noisy, sometimes contradictory irrigation telemetry
//! (soil moisture, temperature, humidity, pump state, flow rate, cumulative
//! volume) into a single trustworthy time series for display and alerting.
//!
//! Key guarantees:
//! - Accepted samples have strictly increasing timestamps
//! - Water totals never decrease except on an explicit counter reset
//! - Malformed input degrades to null fields, never to failure
//!
//! ```
//! use irriguard_core::{RawSample, StreamContext};
//!
//! let mut ctx = StreamContext::builder().build();
//!
//! let raw = RawSample::from_slice(
//!     br#"{"timestamp": 1700000000, "flow_rate_lps": 0.4, "pump_state": "ON"}"#,
//! ).unwrap();
//!
//! match ctx.ingest(&raw) {
//!     Some(processed) => { let _ = processed.water.cumulative_liters; }
//!     None => {} // rejected (stale timestamp) or stream inactive
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod clock;
pub mod context;
pub mod normalize;
pub mod notify;
pub mod sample;
pub mod smooth;
pub mod store;
pub mod synth;
pub mod water;

// Public API
pub use clock::{Clock, FixedClock, SystemClock, Timestamp};
pub use context::{ProcessedSample, StreamContext, StreamContextBuilder};
pub use normalize::{NormalizerStats, SampleNormalizer};
pub use notify::{AnomalyDetector, DetectorConfig, Notification, NotificationLog, Severity};
pub use sample::{CanonicalSample, RawNotification, RawSample};
pub use smooth::{Channel, Smoother};
pub use store::{FileStore, MemoryStore, StateStore};
pub use synth::{SynthConfig, SyntheticSampleEngine};
pub use water::{FlowSummary, WaterAccount, WaterAccountant};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
