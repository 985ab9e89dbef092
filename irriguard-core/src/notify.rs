//! Anomaly detection and the bounded notification log
//!
//! [`AnomalyDetector`] turns canonical samples into notification drafts by
//! evaluating independent rules per sample (a sample may produce zero or
//! several). [`NotificationLog`] assigns monotonic ids, keeps a bounded
//! most-recent-first history with oldest-first eviction, and handles
//! acknowledgement and id-based deduplication against a remote feed.
//!
//! ## Capacity
//!
//! The log is a fixed-capacity [`heapless::Deque`]: retention cost is bounded
//! at construction and a flood of alerts degrades by evicting the oldest
//! entries instead of growing without bound.

use std::sync::Arc;

use heapless::Deque;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Timestamp;
use crate::sample::CanonicalSample;
use crate::store::StateStore;
use crate::water::DEFAULT_SPIKE_THRESHOLD_LPS;

/// Default retention cap for [`NotificationLog`]
pub const DEFAULT_LOG_CAP: usize = 500;

/// Default soil moisture percentage below which a warning fires
pub const DEFAULT_LOW_MOISTURE_THRESHOLD: f64 = 20.0;

/// Notification severity, ordered least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine state change
    Info,
    /// Condition worth attention
    Warning,
    /// Condition requiring action
    Critical,
}

impl Severity {
    /// Wire name of the severity
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Map a wire `type` string to a severity; unknown kinds are info
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            k if k.eq_ignore_ascii_case("critical") => Severity::Critical,
            k if k.eq_ignore_ascii_case("warning") => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// A recorded, id-bearing notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Locally unique, monotonically increasing id
    pub id: u64,
    /// Epoch milliseconds at which the event was recorded
    pub ts_millis: Timestamp,
    /// Urgency class, `"type"` on the wire
    #[serde(rename = "type")]
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Structured context for the event
    #[serde(default)]
    pub data: Value,
    /// Whether a user has acknowledged this notification, `"seen"` on the wire
    #[serde(default, rename = "seen")]
    pub acknowledged: bool,
}

/// A detector-produced event awaiting an id from the log
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    /// Urgency class
    pub severity: Severity,
    /// Human-readable description
    pub message: String,
    /// Structured context for the event
    pub data: Value,
}

/// Bounded most-recent-first notification history
pub struct NotificationLog<const CAP: usize = DEFAULT_LOG_CAP> {
    entries: Deque<Notification, CAP>,
    next_id: u64,
    store: Option<Arc<dyn StateStore>>,
    key: String,
}

impl<const CAP: usize> Default for NotificationLog<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> NotificationLog<CAP> {
    /// Create an empty log with no persistence
    pub fn new() -> Self {
        Self {
            entries: Deque::new(),
            next_id: 1,
            store: None,
            key: String::new(),
        }
    }

    /// Attach a state store, reloading any saved history
    pub fn with_store(mut self, store: Arc<dyn StateStore>, key: &str) -> Self {
        self.key = key.to_string();
        if let Some(bytes) = store.load(key) {
            match serde_json::from_slice::<Vec<Notification>>(&bytes) {
                Ok(saved) => {
                    // Saved most-recent-first; push_back preserves that order.
                    for n in saved {
                        self.next_id = self.next_id.max(n.id + 1);
                        if self.entries.push_back(n).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => log::warn!("ignoring unreadable notification history: {}", e),
            }
        }
        self.store = Some(store);
        self
    }

    /// Record a new notification, returning its assigned id
    ///
    /// The oldest entry is evicted when the log is at capacity.
    pub fn record(
        &mut self,
        severity: Severity,
        message: impl Into<String>,
        data: Value,
        ts_millis: Timestamp,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let notification = Notification {
            id,
            ts_millis,
            severity,
            message: message.into(),
            data,
            acknowledged: false,
        };
        self.insert_front(notification);
        self.persist();
        id
    }

    /// Merge notifications from a remote feed, deduplicating by id
    ///
    /// Items whose id already exists locally are discarded silently; accepted
    /// items keep their remote ids and push the local id sequence past them.
    pub fn merge_remote(&mut self, items: impl IntoIterator<Item = Notification>) {
        let mut merged = false;
        for item in items {
            if self.entries.iter().any(|n| n.id == item.id) {
                continue;
            }
            self.next_id = self.next_id.max(item.id + 1);
            self.insert_front(item);
            merged = true;
        }
        if merged {
            self.persist();
        }
    }

    /// Mark one notification acknowledged; false if the id is unknown
    pub fn acknowledge(&mut self, id: u64) -> bool {
        let mut found = false;
        for n in self.entries.iter_mut() {
            if n.id == id {
                n.acknowledged = true;
                found = true;
                break;
            }
        }
        if found {
            self.persist();
        }
        found
    }

    /// Mark every notification acknowledged
    pub fn acknowledge_all(&mut self) {
        for n in self.entries.iter_mut() {
            n.acknowledged = true;
        }
        self.persist();
    }

    /// Count of notifications not yet acknowledged
    pub fn unseen(&self) -> usize {
        self.entries.iter().filter(|n| !n.acknowledged).count()
    }

    /// Iterate most-recent-first
    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.entries.iter()
    }

    /// Number of retained notifications
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert_front(&mut self, notification: Notification) {
        if self.entries.is_full() {
            self.entries.pop_back();
        }
        // Cannot fail after the eviction above.
        let _ = self.entries.push_front(notification);
    }

    fn persist(&self) {
        let Some(store) = &self.store else { return };
        let snapshot: Vec<&Notification> = self.entries.iter().collect();
        match serde_json::to_vec(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = store.save(&self.key, &bytes) {
                    log::warn!("failed to persist notification history: {}", e);
                }
            }
            Err(e) => log::warn!("failed to encode notification history: {}", e),
        }
    }
}

/// Thresholds for [`AnomalyDetector`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Flow rate above which a critical spike notification fires (L/s)
    pub spike_threshold_lps: f64,
    /// Soil moisture percentage below which a warning fires
    pub low_moisture_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            spike_threshold_lps: DEFAULT_SPIKE_THRESHOLD_LPS,
            low_moisture_threshold: DEFAULT_LOW_MOISTURE_THRESHOLD,
        }
    }
}

/// Evaluates each sample against threshold and transition rules
///
/// Stateless apart from the previously observed pump state, which drives
/// transition detection. Rules fire independently, so one sample can produce
/// several drafts; their order is fixed (spike, moisture, pump, embedded).
pub struct AnomalyDetector {
    cfg: DetectorConfig,
    last_pump: Option<bool>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl AnomalyDetector {
    /// Create a detector with the given thresholds
    pub fn new(cfg: DetectorConfig) -> Self {
        Self {
            cfg,
            last_pump: None,
        }
    }

    /// Evaluate one canonical sample, returning zero or more drafts
    pub fn evaluate(&mut self, sample: &CanonicalSample) -> Vec<NotificationDraft> {
        let mut drafts = Vec::new();

        if let Some(flow) = sample.flow_rate_lps {
            if flow > self.cfg.spike_threshold_lps {
                drafts.push(NotificationDraft {
                    severity: Severity::Critical,
                    message: format!("High flow spike detected: {:.2} L/s", flow),
                    data: serde_json::json!({ "flow_rate_lps": flow }),
                });
            }
        }

        if let Some(moisture) = sample.soil_moisture {
            if moisture < self.cfg.low_moisture_threshold {
                drafts.push(NotificationDraft {
                    severity: Severity::Warning,
                    message: format!("Low soil moisture: {:.0}%", moisture),
                    data: serde_json::json!({ "soil_moisture": moisture }),
                });
            }
        }

        // Transition only fires once a previous state is known.
        if let Some(prev) = self.last_pump {
            if prev != sample.pump_on {
                let state = if sample.pump_on { "ON" } else { "OFF" };
                drafts.push(NotificationDraft {
                    severity: Severity::Info,
                    message: format!("Pump turned {}", state),
                    data: serde_json::json!({ "pump_on": sample.pump_on }),
                });
            }
        }
        self.last_pump = Some(sample.pump_on);

        if let Some(embedded) = &sample.notification {
            drafts.push(NotificationDraft {
                severity: Severity::from_kind(&embedded.kind),
                message: embedded.message.clone(),
                data: embedded.data.clone(),
            });
        }

        drafts
    }

    /// Active thresholds
    pub fn config(&self) -> &DetectorConfig {
        &self.cfg
    }
}
