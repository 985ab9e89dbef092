//! Water volume accounting
//!
//! Maintains the authoritative cumulative-liters figure for one stream.
//! Two reporting styles are supported and resolved per sample:
//!
//! - **Authoritative total**: when a sample carries `water_total_liters`,
//!   that value wins. A total lower than the previous one means the meter
//!   was reset; accounting rebases onto the new total instead of producing
//!   a negative rate.
//! - **Flow only**: without a total, flow is integrated over the sample's
//!   clamped delta, but only while the pump is on. Sensor noise with the
//!   pump off never accumulates.
//!
//! Accounting state can be persisted through a [`StateStore`] so a restart
//! resumes from the saved cumulative figure while the save is fresh.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::sample::CanonicalSample;
use crate::store::StateStore;

/// Instantaneous flow above this rate is flagged as a spike (L/s)
pub const DEFAULT_SPIKE_THRESHOLD_LPS: f64 = 2.0;

/// Persisted accounting state older than this is discarded on restore
pub const DEFAULT_STATE_TTL_MS: u64 = 3_600_000;

/// Accounting state for one stream
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WaterAccount {
    /// Total liters delivered since the account started (or last reset rebase)
    pub cumulative_liters: f64,
    /// Last authoritative total seen, if the stream reports one
    pub last_known_total: Option<f64>,
    /// Instantaneous rate derived from the most recent sample (L/s)
    pub last_instantaneous_lps: f64,
    /// Meter resets observed over the account's lifetime
    pub resets: u32,
}

/// Per-sample accounting result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSummary {
    /// Instantaneous flow rate for this sample (L/s), never negative
    pub instantaneous_lps: f64,
    /// Cumulative liters after applying this sample
    pub cumulative_liters: f64,
    /// True when this sample revealed a meter reset
    pub reset_detected: bool,
    /// True when the instantaneous rate crossed the spike threshold
    pub spike: bool,
}

/// On-disk shape of a saved account
#[derive(Debug, Serialize, Deserialize)]
struct PersistedAccount {
    cumulative: f64,
    last_total: Option<f64>,
    saved_at_ms: u64,
}

/// Applies samples to a [`WaterAccount`], optionally persisting it
pub struct WaterAccountant {
    account: WaterAccount,
    spike_threshold_lps: f64,
    last_sample_ts: Option<u64>,
    store: Option<Arc<dyn StateStore>>,
    key: String,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
}

impl Default for WaterAccountant {
    fn default() -> Self {
        Self::new(DEFAULT_SPIKE_THRESHOLD_LPS)
    }
}

impl WaterAccountant {
    /// Create an accountant with the given spike threshold and no persistence
    pub fn new(spike_threshold_lps: f64) -> Self {
        Self {
            account: WaterAccount::default(),
            spike_threshold_lps,
            last_sample_ts: None,
            store: None,
            key: String::new(),
            ttl_ms: DEFAULT_STATE_TTL_MS,
            clock: Arc::new(SystemClock),
        }
    }

    /// Attach a state store, restoring saved state if it is still fresh
    pub fn with_store(mut self, store: Arc<dyn StateStore>, key: &str) -> Self {
        self.key = key.to_string();
        if let Some(bytes) = store.load(key) {
            match serde_json::from_slice::<PersistedAccount>(&bytes) {
                Ok(saved) => {
                    let age = self.clock.now().saturating_sub(saved.saved_at_ms);
                    if age <= self.ttl_ms {
                        self.account.cumulative_liters = saved.cumulative;
                        self.account.last_known_total = saved.last_total;
                        log::info!(
                            "restored water account: {:.3} L ({} ms old)",
                            saved.cumulative,
                            age
                        );
                    } else {
                        log::info!("discarding stale water account ({} ms old)", age);
                    }
                }
                Err(e) => log::warn!("ignoring unreadable water account state: {}", e),
            }
        }
        self.store = Some(store);
        self
    }

    /// Override the freshness window for restored state
    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Replace the clock used for persistence timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Apply one canonical sample and return the accounting outcome
    pub fn account(&mut self, sample: &CanonicalSample) -> FlowSummary {
        let mut reset_detected = false;
        let instantaneous;

        // Real gap since the previous sample. The clamped delta bounds flow
        // integration; a total diff already spans the whole gap, so the rate
        // it implies divides by the real elapsed time.
        let elapsed_seconds = self
            .last_sample_ts
            .map(|last| (sample.ts_millis.saturating_sub(last)) as f64 / 1000.0)
            .unwrap_or(0.0);
        self.last_sample_ts = Some(sample.ts_millis);

        if let Some(total) = sample.water_total_liters {
            // Authoritative total wins over any flow reading.
            match self.account.last_known_total {
                Some(prev) if total < prev => {
                    // Meter reset: rebase, do not integrate a negative diff.
                    reset_detected = true;
                    self.account.resets += 1;
                    instantaneous = 0.0;
                    log::warn!("meter reset detected: total {:.3} -> {:.3}", prev, total);
                }
                Some(prev) => {
                    let diff = total - prev;
                    instantaneous = if elapsed_seconds > 0.0 {
                        diff / elapsed_seconds
                    } else {
                        0.0
                    };
                }
                None => instantaneous = 0.0,
            }
            self.account.cumulative_liters = total;
            self.account.last_known_total = Some(total);
        } else if let Some(flow) = sample.flow_rate_lps {
            if sample.pump_on {
                instantaneous = flow.max(0.0);
                self.account.cumulative_liters += instantaneous * sample.delta_seconds;
            } else {
                // Pump off: sensor noise must not accumulate.
                instantaneous = 0.0;
            }
        } else {
            instantaneous = 0.0;
        }

        self.account.last_instantaneous_lps = instantaneous;

        let summary = FlowSummary {
            instantaneous_lps: instantaneous,
            cumulative_liters: self.account.cumulative_liters,
            reset_detected,
            spike: instantaneous > self.spike_threshold_lps,
        };

        self.persist();
        summary
    }

    /// Current accounting state
    pub fn state(&self) -> &WaterAccount {
        &self.account
    }

    fn persist(&self) {
        let Some(store) = &self.store else { return };
        let saved = PersistedAccount {
            cumulative: self.account.cumulative_liters,
            last_total: self.account.last_known_total,
            saved_at_ms: self.clock.now(),
        };
        match serde_json::to_vec(&saved) {
            Ok(bytes) => {
                if let Err(e) = store.save(&self.key, &bytes) {
                    log::warn!("failed to persist water account: {}", e);
                }
            }
            Err(e) => log::warn!("failed to encode water account: {}", e),
        }
    }
}
