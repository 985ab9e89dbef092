//! Synthetic sample generation
//!
//! Emulates a duty-cycled pump watering a slowly drifting soil/air system,
//! so the full ingestion path can be exercised without hardware. The engine
//! advances by real elapsed time between ticks rather than a fixed step, so
//! irregular scheduling does not distort the simulated totals.
//!
//! Two consumption styles mirror a real feed: [`SyntheticSampleEngine::tick`]
//! publishes one sample per call to every subscriber (the push shape), and
//! [`SyntheticSampleEngine::next_sample`] returns one fresh sample per call
//! (the pull shape).

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use thiserror::Error;

use crate::bus::{Subscription, Topic};
use crate::clock::{Clock, SystemClock, Timestamp};
use crate::notify::DEFAULT_LOW_MOISTURE_THRESHOLD;
use crate::sample::RawSample;

/// Bounds applied to the per-tick elapsed time (seconds)
const MIN_TICK_SECONDS: f64 = 0.1;
const MAX_TICK_SECONDS: f64 = 1.0;

/// Simulated environment bounds
const MOISTURE_RANGE: (f64, f64) = (10.0, 90.0);
const TEMPERATURE_RANGE: (f64, f64) = (15.0, 40.0);
const HUMIDITY_RANGE: (f64, f64) = (20.0, 95.0);

/// Moisture drift rates in percentage points per second
const MOISTURE_RISE_PER_SEC: f64 = 0.8;
const MOISTURE_FALL_PER_SEC: f64 = 0.2;

/// Errors from synthetic configuration parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SynthConfigError {
    /// A pump pattern string did not match `"N:M"` or `"NonMoff"`
    #[error("invalid pump pattern {0:?}, expected \"N:M\" or \"NonMoff\" seconds")]
    InvalidPumpPattern(String),
    /// A flag's value was missing or not a number
    #[error("invalid value for {flag}: {value:?}")]
    InvalidFlagValue {
        /// The flag being parsed
        flag: &'static str,
        /// The offending value, if one was present
        value: Option<String>,
    },
}

/// Configuration for [`SyntheticSampleEngine`]
#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    /// Milliseconds between ticks
    pub tick_interval_ms: u64,
    /// Total run duration; `None` runs until stopped
    pub duration_secs: Option<u64>,
    /// Nominal flow while the pump is on (L/s)
    pub base_flow_lps: f64,
    /// Multiplier applied to flow during a transient spike
    pub spike_factor: f64,
    /// Per-tick probability of a spike
    pub spike_frequency: f64,
    /// Pump duty-cycle on phase (seconds)
    pub pump_on_secs: f64,
    /// Pump duty-cycle off phase (seconds)
    pub pump_off_secs: f64,
    /// Moisture percentage below which the pump is forced on
    pub moisture_threshold: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            duration_secs: None,
            base_flow_lps: 0.35,
            spike_factor: 2.0,
            spike_frequency: 0.15,
            pump_on_secs: 6.0,
            pump_off_secs: 6.0,
            moisture_threshold: DEFAULT_LOW_MOISTURE_THRESHOLD,
            seed: None,
        }
    }
}

impl SynthConfig {
    /// Set the tick cadence in milliseconds
    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Bound the total run duration in seconds
    pub fn duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Set the per-tick spike probability
    pub fn spike_frequency(mut self, p: f64) -> Self {
        self.spike_frequency = p.clamp(0.0, 1.0);
        self
    }

    /// Seed the RNG for reproducible runs
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the duty cycle from a pattern string
    ///
    /// Accepts `"6:6"` (on:off seconds) and the spelled-out `"6on6off"` form.
    pub fn pump_pattern(mut self, pattern: &str) -> Result<Self, SynthConfigError> {
        let (on, off) = parse_pump_pattern(pattern)
            .ok_or_else(|| SynthConfigError::InvalidPumpPattern(pattern.to_string()))?;
        self.pump_on_secs = on;
        self.pump_off_secs = off;
        Ok(self)
    }

    /// Build a configuration from CLI-style arguments
    ///
    /// Recognizes `--duration <secs>`, `--interval <ms>`,
    /// `--spike-frequency <p>` and `--pump-pattern <N:M>`, each also in
    /// `--flag=value` form. Unknown arguments are ignored so the parser can
    /// sit behind a larger argument surface.
    pub fn from_args<I, S>(args: I) -> Result<Self, SynthConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cfg = Self::default();
        let mut iter = args.into_iter().peekable();

        while let Some(arg) = iter.next() {
            let arg = arg.as_ref();
            let (flag, inline) = match arg.split_once('=') {
                Some((f, v)) => (f, Some(v.to_string())),
                None => (arg, None),
            };

            let mut value_for = |flag: &'static str| -> Result<String, SynthConfigError> {
                if let Some(v) = inline.clone() {
                    return Ok(v);
                }
                iter.next()
                    .map(|v| v.as_ref().to_string())
                    .ok_or(SynthConfigError::InvalidFlagValue { flag, value: None })
            };

            match flag {
                "--duration" => {
                    let v = value_for("--duration")?;
                    cfg.duration_secs =
                        Some(v.parse().map_err(|_| SynthConfigError::InvalidFlagValue {
                            flag: "--duration",
                            value: Some(v),
                        })?);
                }
                "--interval" => {
                    let v = value_for("--interval")?;
                    cfg.tick_interval_ms =
                        v.parse().map_err(|_| SynthConfigError::InvalidFlagValue {
                            flag: "--interval",
                            value: Some(v),
                        })?;
                }
                "--spike-frequency" => {
                    let v = value_for("--spike-frequency")?;
                    let p: f64 = v.parse().map_err(|_| SynthConfigError::InvalidFlagValue {
                        flag: "--spike-frequency",
                        value: Some(v),
                    })?;
                    cfg.spike_frequency = p.clamp(0.0, 1.0);
                }
                "--pump-pattern" => {
                    let v = value_for("--pump-pattern")?;
                    cfg = cfg.pump_pattern(&v)?;
                }
                _ => {}
            }
        }
        Ok(cfg)
    }
}

fn parse_pump_pattern(pattern: &str) -> Option<(f64, f64)> {
    let p = pattern.trim();

    if let Some((on, off)) = p.split_once(':') {
        let on: f64 = on.trim().parse().ok()?;
        let off: f64 = off.trim().parse().ok()?;
        return (on > 0.0 && off > 0.0).then_some((on, off));
    }

    // "6on6off" form, case-insensitive.
    let lower = p.to_ascii_lowercase();
    let rest = lower.strip_suffix("off")?;
    let (on_part, off_part) = rest.split_once("on")?;
    let on: f64 = on_part.trim().parse().ok()?;
    let off: f64 = off_part.trim().parse().ok()?;
    (on > 0.0 && off > 0.0).then_some((on, off))
}

/// Duty-cycle pump simulator emitting raw wire-shaped samples
pub struct SyntheticSampleEngine {
    cfg: SynthConfig,
    rng: StdRng,
    clock: Arc<dyn Clock>,
    last_tick: Option<Timestamp>,
    last_emitted_ts: Option<Timestamp>,
    phase_seconds: f64,
    pump_on: bool,
    soil_moisture: f64,
    temperature: f64,
    humidity: f64,
    water_total: f64,
    topic: Topic<RawSample>,
}

impl SyntheticSampleEngine {
    /// Create an engine driven by the system clock
    pub fn new(cfg: SynthConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit time source
    pub fn with_clock(cfg: SynthConfig, clock: Arc<dyn Clock>) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            cfg,
            rng,
            clock,
            last_tick: None,
            last_emitted_ts: None,
            phase_seconds: 0.0,
            pump_on: true,
            soil_moisture: 45.0,
            temperature: 27.0,
            humidity: 55.0,
            water_total: 0.0,
            topic: Topic::new(),
        }
    }

    /// Register a push subscriber receiving one sample per tick
    pub fn subscribe<F>(&mut self, callback: F) -> Subscription
    where
        F: Fn(&RawSample) + Send + 'static,
    {
        self.topic.subscribe(callback)
    }

    /// Remove a push subscriber
    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        self.topic.unsubscribe(sub)
    }

    /// Advance the simulation one tick and publish the sample
    pub fn tick(&mut self) -> RawSample {
        let sample = self.step();
        self.topic.publish(&sample);
        sample
    }

    /// Advance the simulation one tick and return the sample (pull shape)
    pub fn next_sample(&mut self) -> RawSample {
        self.step()
    }

    /// Whether the simulated pump is currently on
    pub fn pump_on(&self) -> bool {
        self.pump_on
    }

    /// Cumulative simulated liters delivered
    pub fn water_total(&self) -> f64 {
        self.water_total
    }

    fn step(&mut self) -> RawSample {
        let now = self.clock.now();

        // Emitted timestamps must be strictly increasing even when the clock
        // stalls or steps backwards.
        let ts = match self.last_emitted_ts {
            Some(last) if now <= last => last + 1,
            _ => now,
        };

        let dt = match self.last_tick {
            Some(last) => ((ts.saturating_sub(last)) as f64 / 1000.0)
                .clamp(MIN_TICK_SECONDS, MAX_TICK_SECONDS),
            None => (self.cfg.tick_interval_ms as f64 / 1000.0)
                .clamp(MIN_TICK_SECONDS, MAX_TICK_SECONDS),
        };
        self.last_tick = Some(ts);
        self.last_emitted_ts = Some(ts);

        let was_on = self.pump_on;

        // Duty cycle, with a feedback override: dry soil forces the pump on
        // regardless of phase, never off.
        self.phase_seconds += dt;
        let cycle = self.cfg.pump_on_secs + self.cfg.pump_off_secs;
        if cycle > 0.0 {
            self.phase_seconds %= cycle;
        }
        self.pump_on = self.phase_seconds < self.cfg.pump_on_secs
            || self.soil_moisture < self.cfg.moisture_threshold;

        let mut flow = 0.0;
        let mut spiked = false;
        if self.pump_on {
            flow = self.cfg.base_flow_lps;
            if self.rng.gen_bool(self.cfg.spike_frequency) {
                flow *= self.cfg.spike_factor;
                spiked = true;
            }
            flow = self.jitter(flow, flow * 0.1).max(0.0);
            self.water_total += flow * dt;
        }

        // Moisture responds to the pump; air conditions drift on their own.
        let moisture_rate = if self.pump_on {
            MOISTURE_RISE_PER_SEC
        } else {
            -MOISTURE_FALL_PER_SEC
        };
        self.soil_moisture = self
            .jitter(self.soil_moisture + moisture_rate * dt, 0.5)
            .clamp(MOISTURE_RANGE.0, MOISTURE_RANGE.1);
        self.temperature = self
            .jitter(self.temperature, 0.05 * dt)
            .clamp(TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1);
        self.humidity = self
            .jitter(self.humidity, 0.1 * dt)
            .clamp(HUMIDITY_RANGE.0, HUMIDITY_RANGE.1);

        // At most one embedded notification per tick, highest-signal first.
        let notification = if self.pump_on != was_on {
            let state = if self.pump_on { "ON" } else { "OFF" };
            Some(json!({
                "type": "info",
                "message": format!("Pump turned {}", state),
                "data": { "pump_on": self.pump_on }
            }))
        } else if spiked && flow > 0.5 {
            Some(json!({
                "type": "critical",
                "message": format!("High flow spike detected: {:.2} L/s", flow),
                "data": { "flow_rate_lps": flow }
            }))
        } else if self.soil_moisture < self.cfg.moisture_threshold {
            Some(json!({
                "type": "warning",
                "message": format!("Low soil moisture: {:.0}%", self.soil_moisture),
                "data": { "soil_moisture": self.soil_moisture }
            }))
        } else {
            None
        };

        RawSample {
            timestamp: Some(json!(ts)),
            temperature: Some(json!(round2(self.temperature))),
            humidity: Some(json!(round2(self.humidity))),
            soil_moisture: Some(json!(round2(self.soil_moisture))),
            pump_state: Some(json!(self.pump_on)),
            flow_rate_lps: Some(json!(round2(flow))),
            water_total_liters: Some(json!(round2(self.water_total))),
            notification,
        }
    }

    fn jitter(&mut self, value: f64, amount: f64) -> f64 {
        value + (self.rng.gen::<f64>() - 0.5) * amount * 2.0
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::Value;

    fn engine_at(cfg: SynthConfig, clock: &Arc<FixedClock>) -> SyntheticSampleEngine {
        SyntheticSampleEngine::with_clock(cfg, clock.clone() as Arc<dyn Clock>)
    }

    fn ts_of(sample: &RawSample) -> u64 {
        match &sample.timestamp {
            Some(Value::Number(n)) => n.as_u64().unwrap(),
            other => panic!("expected numeric timestamp, got {:?}", other),
        }
    }

    #[test]
    fn pump_pattern_parsing() {
        assert_eq!(parse_pump_pattern("6:6"), Some((6.0, 6.0)));
        assert_eq!(parse_pump_pattern("3.5:10"), Some((3.5, 10.0)));
        assert_eq!(parse_pump_pattern("6on6off"), Some((6.0, 6.0)));
        assert_eq!(parse_pump_pattern("2ON8OFF"), Some((2.0, 8.0)));
        assert_eq!(parse_pump_pattern("banana"), None);
        assert_eq!(parse_pump_pattern("0:5"), None);
        assert_eq!(parse_pump_pattern("-1:5"), None);
    }

    #[test]
    fn args_parse_both_flag_forms() {
        let cfg = SynthConfig::from_args([
            "--duration",
            "30",
            "--interval=500",
            "--spike-frequency",
            "0.5",
            "--pump-pattern=4:8",
        ])
        .unwrap();
        assert_eq!(cfg.duration_secs, Some(30));
        assert_eq!(cfg.tick_interval_ms, 500);
        assert_eq!(cfg.spike_frequency, 0.5);
        assert_eq!(cfg.pump_on_secs, 4.0);
        assert_eq!(cfg.pump_off_secs, 8.0);
    }

    #[test]
    fn bad_args_are_rejected() {
        assert!(matches!(
            SynthConfig::from_args(["--duration", "soon"]),
            Err(SynthConfigError::InvalidFlagValue { flag: "--duration", .. })
        ));
        assert!(matches!(
            SynthConfig::from_args(["--pump-pattern", "forever"]),
            Err(SynthConfigError::InvalidPumpPattern(_))
        ));
        // Unknown flags pass through untouched.
        assert!(SynthConfig::from_args(["--verbose"]).is_ok());
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let cfg = SynthConfig::default().seed(7);
        let clock_a = Arc::new(FixedClock::new(1_000_000));
        let clock_b = Arc::new(FixedClock::new(1_000_000));
        let mut a = engine_at(cfg.clone(), &clock_a);
        let mut b = engine_at(cfg, &clock_b);

        for _ in 0..20 {
            clock_a.advance(1000);
            clock_b.advance(1000);
            assert_eq!(a.next_sample(), b.next_sample());
        }
    }

    #[test]
    fn timestamps_are_strictly_increasing_even_when_clock_stalls() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let mut engine = engine_at(SynthConfig::default().seed(1), &clock);

        let first = ts_of(&engine.next_sample());
        // Clock does not advance: the emitted timestamp must still move.
        let second = ts_of(&engine.next_sample());
        let third = ts_of(&engine.next_sample());
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn pump_follows_duty_cycle() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let cfg = SynthConfig {
            // Moisture starts at 45, well above the override threshold.
            pump_on_secs: 3.0,
            pump_off_secs: 3.0,
            seed: Some(2),
            ..SynthConfig::default()
        };
        let mut engine = engine_at(cfg, &clock);

        let mut states = Vec::new();
        for _ in 0..6 {
            clock.advance(1000);
            engine.next_sample();
            states.push(engine.pump_on());
        }
        // Phase advances 1 s per tick through a 3 s on / 3 s off cycle.
        assert_eq!(states, [true, true, false, false, false, true]);
    }

    #[test]
    fn dry_soil_forces_pump_on() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let cfg = SynthConfig {
            pump_on_secs: 1.0,
            pump_off_secs: 100.0,
            moisture_threshold: 60.0,
            seed: Some(3),
            ..SynthConfig::default()
        };
        // Moisture starts at 45 < 60: the override holds the pump on through
        // what would otherwise be a long off phase.
        let mut engine = engine_at(cfg, &clock);
        for _ in 0..10 {
            clock.advance(1000);
            engine.next_sample();
            assert!(engine.pump_on());
        }
    }

    #[test]
    fn water_total_grows_only_while_on() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let cfg = SynthConfig {
            pump_on_secs: 2.0,
            pump_off_secs: 1000.0,
            spike_frequency: 0.0,
            seed: Some(4),
            ..SynthConfig::default()
        };
        let mut engine = engine_at(cfg, &clock);

        clock.advance(1000);
        engine.next_sample();
        let after_on = engine.water_total();
        assert!(after_on > 0.0);

        // Deep into the off phase: the total must hold.
        for _ in 0..5 {
            clock.advance(1000);
            engine.next_sample();
        }
        assert!(!engine.pump_on());
        let frozen = engine.water_total();
        clock.advance(1000);
        engine.next_sample();
        assert_eq!(engine.water_total(), frozen);
    }

    #[test]
    fn subscribers_receive_each_tick() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let clock = Arc::new(FixedClock::new(1_000_000));
        let mut engine = engine_at(SynthConfig::default().seed(5), &clock);
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let sub = engine.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..3 {
            clock.advance(1000);
            engine.tick();
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 3);

        engine.unsubscribe(sub);
        clock.advance(1000);
        engine.tick();
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
    }
}
