//! Per-stream ingestion context
//!
//! One [`StreamContext`] owns every piece of per-stream state: the
//! normalizer, the water account, the smoothing references, the detector's
//! pump memory and the notification log. Nothing is ambient; two contexts
//! observing the same physical feed stay fully independent, and persisted
//! state only ever resumes a single logical stream.
//!
//! ## Ingestion
//!
//! [`StreamContext::ingest`] is the only write path. Each raw reading is
//! normalized first, so everything downstream sees strictly increasing
//! timestamps regardless of transport behavior, then routed through
//! accounting, smoothing and anomaly detection in one synchronous pass. A
//! rejected or inactive sample mutates nothing.
//!
//! ```
//! use irriguard_core::{RawSample, StreamContext};
//!
//! let mut ctx = StreamContext::builder().build();
//! let raw = RawSample::from_slice(
//!     br#"{"timestamp": 1700000000, "flow_rate_lps": 0.4, "pump_state": "ON"}"#,
//! ).unwrap();
//! let processed = ctx.ingest(&raw).unwrap();
//! assert_eq!(processed.water.cumulative_liters, 0.0);
//! ```

use std::sync::Arc;

use crate::bus::{Subscription, Topic};
use crate::clock::Clock;
use crate::normalize::{NormalizerStats, SampleNormalizer};
use crate::notify::{AnomalyDetector, DetectorConfig, Notification, NotificationLog};
use crate::sample::{CanonicalSample, RawSample};
use crate::smooth::{Channel, Smoother, DEFAULT_SMOOTH_ALPHA, DEFAULT_SMOOTH_THRESHOLD};
use crate::store::StateStore;
use crate::water::{FlowSummary, WaterAccount, WaterAccountant, DEFAULT_SPIKE_THRESHOLD_LPS};

/// Smoothed display values for one processed sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplayValues {
    /// Smoothed air temperature
    pub temperature: Option<f64>,
    /// Smoothed relative humidity
    pub humidity: Option<f64>,
    /// Smoothed soil moisture percentage
    pub soil_moisture: Option<f64>,
}

/// Everything derived from one accepted sample
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSample {
    /// The validated, typed sample
    pub canonical: CanonicalSample,
    /// Water accounting outcome for this sample
    pub water: FlowSummary,
    /// Display-grade smoothed channel values
    pub display: DisplayValues,
    /// Ids of notifications this sample produced
    pub notification_ids: Vec<u64>,
}

type ActivePredicate = Box<dyn Fn() -> bool + Send>;

/// Owns all per-stream ingestion state
pub struct StreamContext {
    normalizer: SampleNormalizer,
    accountant: WaterAccountant,
    smoother: Smoother,
    detector: AnomalyDetector,
    log: NotificationLog,
    notifications: Topic<Notification>,
    is_active: Option<ActivePredicate>,
}

impl Default for StreamContext {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StreamContext {
    /// Start building a context
    pub fn builder() -> StreamContextBuilder {
        StreamContextBuilder::new()
    }

    /// Ingest one raw reading
    ///
    /// Returns `None` when the stream is inactive or the sample is rejected
    /// by the normalizer; in both cases no state changes.
    pub fn ingest(&mut self, raw: &RawSample) -> Option<ProcessedSample> {
        if let Some(active) = &self.is_active {
            if !active() {
                return None;
            }
        }

        let canonical = self.normalizer.normalize(raw)?;
        let water = self.accountant.account(&canonical);

        let display = DisplayValues {
            temperature: canonical
                .temperature
                .map(|v| self.smoother.smooth(Channel::Temperature, v)),
            humidity: canonical
                .humidity
                .map(|v| self.smoother.smooth(Channel::Humidity, v)),
            soil_moisture: canonical
                .soil_moisture
                .map(|v| self.smoother.smooth(Channel::SoilMoisture, v)),
        };

        let drafts = self.detector.evaluate(&canonical);
        let mut notification_ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let id = self
                .log
                .record(draft.severity, draft.message, draft.data, canonical.ts_millis);
            notification_ids.push(id);
            // The entry just recorded sits at the front of the log.
            if let Some(n) = self.log.iter().next() {
                self.notifications.publish(n);
            }
        }

        Some(ProcessedSample {
            canonical,
            water,
            display,
            notification_ids,
        })
    }

    /// Subscribe to every notification the stream produces
    pub fn subscribe_notifications<F>(&mut self, callback: F) -> Subscription
    where
        F: Fn(&Notification) + Send + 'static,
    {
        self.notifications.subscribe(callback)
    }

    /// Remove a notification subscriber
    pub fn unsubscribe_notifications(&mut self, sub: Subscription) -> bool {
        self.notifications.unsubscribe(sub)
    }

    /// Current water accounting state
    pub fn water_account(&self) -> &WaterAccount {
        self.accountant.state()
    }

    /// Normalizer accept/drop counters
    pub fn normalizer_stats(&self) -> NormalizerStats {
        self.normalizer.stats()
    }

    /// Notification history, most-recent-first
    pub fn log(&self) -> &NotificationLog {
        &self.log
    }

    /// Mutable notification history, for acknowledgement and remote merge
    pub fn log_mut(&mut self) -> &mut NotificationLog {
        &mut self.log
    }
}

/// Configures and assembles a [`StreamContext`]
pub struct StreamContextBuilder {
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn StateStore>>,
    state_key_prefix: String,
    spike_threshold_lps: f64,
    low_moisture_threshold: f64,
    smooth_alpha: f64,
    smooth_threshold: f64,
    state_ttl_ms: Option<u64>,
    is_active: Option<ActivePredicate>,
}

impl Default for StreamContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamContextBuilder {
    /// Start from defaults: no persistence, no activity gate
    pub fn new() -> Self {
        Self {
            clock: None,
            store: None,
            state_key_prefix: "stream".to_string(),
            spike_threshold_lps: DEFAULT_SPIKE_THRESHOLD_LPS,
            low_moisture_threshold: crate::notify::DEFAULT_LOW_MOISTURE_THRESHOLD,
            smooth_alpha: DEFAULT_SMOOTH_ALPHA,
            smooth_threshold: DEFAULT_SMOOTH_THRESHOLD,
            state_ttl_ms: None,
            is_active: None,
        }
    }

    /// Use an explicit time source for fallbacks and persistence stamps
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Persist water and notification state through this store
    ///
    /// Keys are derived from the prefix: `<prefix>.water` and
    /// `<prefix>.notifications`.
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the persisted-state key prefix (default `"stream"`)
    pub fn state_key_prefix(mut self, prefix: &str) -> Self {
        self.state_key_prefix = prefix.to_string();
        self
    }

    /// Flow rate treated as a spike, shared by accounting and detection
    pub fn spike_threshold_lps(mut self, lps: f64) -> Self {
        self.spike_threshold_lps = lps;
        self
    }

    /// Soil moisture percentage below which a warning fires
    pub fn low_moisture_threshold(mut self, pct: f64) -> Self {
        self.low_moisture_threshold = pct;
        self
    }

    /// Display smoothing parameters
    pub fn smoothing(mut self, alpha: f64, threshold: f64) -> Self {
        self.smooth_alpha = alpha;
        self.smooth_threshold = threshold;
        self
    }

    /// Freshness window for restored persisted state
    pub fn state_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.state_ttl_ms = Some(ttl_ms);
        self
    }

    /// Caller-supplied activity gate; while false, ingest is a no-op
    pub fn is_active<F>(mut self, predicate: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.is_active = Some(Box::new(predicate));
        self
    }

    /// Assemble the context
    pub fn build(self) -> StreamContext {
        let normalizer = match &self.clock {
            Some(clock) => SampleNormalizer::with_clock(clock.clone()),
            None => SampleNormalizer::new(),
        };

        let mut accountant = WaterAccountant::new(self.spike_threshold_lps);
        if let Some(clock) = &self.clock {
            accountant = accountant.with_clock(clock.clone());
        }
        if let Some(ttl) = self.state_ttl_ms {
            accountant = accountant.with_ttl(ttl);
        }

        let mut log = NotificationLog::new();
        if let Some(store) = &self.store {
            let water_key = format!("{}.water", self.state_key_prefix);
            let log_key = format!("{}.notifications", self.state_key_prefix);
            accountant = accountant.with_store(store.clone(), &water_key);
            log = log.with_store(store.clone(), &log_key);
        }

        StreamContext {
            normalizer,
            accountant,
            smoother: Smoother::new(self.smooth_alpha, self.smooth_threshold),
            detector: AnomalyDetector::new(DetectorConfig {
                spike_threshold_lps: self.spike_threshold_lps,
                low_moisture_threshold: self.low_moisture_threshold,
            }),
            log,
            notifications: Topic::new(),
            is_active: self.is_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::notify::Severity;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn raw(ts: u64, fields: serde_json::Value) -> RawSample {
        let mut obj = fields;
        obj["timestamp"] = json!(ts);
        RawSample::from_value(&obj).unwrap()
    }

    #[test]
    fn ingest_routes_through_every_component() {
        let mut ctx = StreamContext::builder()
            .clock(Arc::new(FixedClock::new(0)))
            .build();

        ctx.ingest(&raw(
            2_000_000_000_000,
            json!({ "soil_moisture": 25.0, "flow_rate_lps": 1.0, "pump_state": true }),
        ))
        .unwrap();

        let p = ctx
            .ingest(&raw(
                2_000_000_001_000,
                json!({ "soil_moisture": 18.0, "flow_rate_lps": 1.0, "pump_state": true }),
            ))
            .unwrap();

        // Flow integrated over the 1 s delta while on.
        assert!((p.water.cumulative_liters - 1.0).abs() < 1e-9);
        // Moisture drop of 7 > threshold 1.2 is damped for display only.
        let display = p.display.soil_moisture.unwrap();
        assert!((display - (25.0 * 0.7 + 18.0 * 0.3)).abs() < 1e-9);
        assert_eq!(p.canonical.soil_moisture, Some(18.0));
        // The low-moisture warning fired exactly once.
        assert_eq!(p.notification_ids.len(), 1);
        assert_eq!(ctx.log().iter().next().unwrap().severity, Severity::Warning);
    }

    #[test]
    fn inactive_stream_mutates_nothing() {
        let active = Arc::new(AtomicBool::new(false));
        let gate = active.clone();
        let mut ctx = StreamContext::builder()
            .clock(Arc::new(FixedClock::new(0)))
            .is_active(move || gate.load(Ordering::SeqCst))
            .build();

        let sample = raw(2_000_000_000_000, json!({ "flow_rate_lps": 1.0, "pump_state": true }));
        assert!(ctx.ingest(&sample).is_none());
        assert_eq!(ctx.normalizer_stats().accepted, 0);
        assert_eq!(ctx.water_account().cumulative_liters, 0.0);

        active.store(true, Ordering::SeqCst);
        assert!(ctx.ingest(&sample).is_some());
        assert_eq!(ctx.normalizer_stats().accepted, 1);
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let mut ctx = StreamContext::builder()
            .clock(Arc::new(FixedClock::new(0)))
            .build();

        let sample = raw(
            2_000_000_000_000,
            json!({ "flow_rate_lps": 1.0, "pump_state": true, "water_total_liters": 5.0 }),
        );
        assert!(ctx.ingest(&sample).is_some());
        // Same payload again, as a retrying transport would deliver it.
        assert!(ctx.ingest(&sample).is_none());

        let stats = ctx.normalizer_stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(ctx.water_account().cumulative_liters, 5.0);
    }

    #[test]
    fn notifications_are_published_to_subscribers() {
        use std::sync::atomic::AtomicUsize;

        let mut ctx = StreamContext::builder()
            .clock(Arc::new(FixedClock::new(0)))
            .build();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        ctx.subscribe_notifications(move |n| {
            assert_eq!(n.severity, Severity::Critical);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        ctx.ingest(&raw(
            2_000_000_000_000,
            json!({ "flow_rate_lps": 3.0, "pump_state": true }),
        ))
        .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn context_resumes_from_persisted_state() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let store: Arc<dyn StateStore> = Arc::new(crate::store::MemoryStore::new());

        {
            let mut ctx = StreamContext::builder()
                .clock(clock.clone())
                .store(store.clone())
                .state_key_prefix("greenhouse")
                .build();
            ctx.ingest(&raw(
                2_000_000_000_000,
                json!({ "flow_rate_lps": 3.0, "pump_state": true }),
            ))
            .unwrap();
        }

        clock.advance(5_000);
        let resumed = StreamContext::builder()
            .clock(clock)
            .store(store)
            .state_key_prefix("greenhouse")
            .build();
        // Water state and the spike notification both survived the restart.
        assert_eq!(resumed.log().len(), 1);
        assert_eq!(resumed.log().unseen(), 1);
    }
}
