//! Display smoothing for environmental channels
//!
//! Damps isolated outlier spikes in display-grade values without lagging
//! behind genuine trends. Small per-reading deltas pass through untouched;
//! only a jump beyond the threshold is blended toward the reference.
//!
//! The water accounting path never goes through here. Smoothing an integral
//! would silently lose volume.

/// Default exponential blend factor
pub const DEFAULT_SMOOTH_ALPHA: f64 = 0.3;

/// Default jump size (in channel units) above which smoothing engages
pub const DEFAULT_SMOOTH_THRESHOLD: f64 = 1.2;

/// Display channels subject to smoothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Air temperature
    Temperature,
    /// Relative humidity
    Humidity,
    /// Soil moisture percentage
    SoilMoisture,
}

impl Channel {
    fn index(self) -> usize {
        match self {
            Channel::Temperature => 0,
            Channel::Humidity => 1,
            Channel::SoilMoisture => 2,
        }
    }
}

/// Per-channel outlier damping with a last-emitted reference value
#[derive(Debug, Clone)]
pub struct Smoother {
    alpha: f64,
    threshold: f64,
    state: [Option<f64>; 3],
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTH_ALPHA, DEFAULT_SMOOTH_THRESHOLD)
    }
}

impl Smoother {
    /// Create a smoother with explicit blend factor and engage threshold
    pub fn new(alpha: f64, threshold: f64) -> Self {
        Self {
            alpha,
            threshold,
            state: [None; 3],
        }
    }

    /// Smooth one reading for a channel, returning the display value
    pub fn smooth(&mut self, channel: Channel, value: f64) -> f64 {
        let slot = &mut self.state[channel.index()];
        let out = match *slot {
            Some(reference) if (value - reference).abs() > self.threshold => {
                reference * (1.0 - self.alpha) + value * self.alpha
            }
            _ => value,
        };
        *slot = Some(out);
        out
    }

    /// Last emitted value for a channel, if any reading has been seen
    pub fn reference(&self, channel: Channel) -> Option<f64> {
        self.state[channel.index()]
    }

    /// Forget all channel references (new logical stream)
    pub fn flush(&mut self) {
        self.state = [None; 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reading_passes_through() {
        let mut s = Smoother::default();
        assert_eq!(s.smooth(Channel::Temperature, 23.7), 23.7);
        assert_eq!(s.reference(Channel::Temperature), Some(23.7));
    }

    #[test]
    fn sub_threshold_ramp_is_never_lagged() {
        let mut s = Smoother::default();
        // Per-step delta 1.0 < threshold 1.2: every value emitted raw.
        let mut v = 20.0;
        for _ in 0..10 {
            v += 1.0;
            assert_eq!(s.smooth(Channel::SoilMoisture, v), v);
        }
    }

    #[test]
    fn outlier_spike_is_damped() {
        let mut s = Smoother::new(0.3, 1.2);
        s.smooth(Channel::Humidity, 50.0);
        let out = s.smooth(Channel::Humidity, 60.0);
        // 50*0.7 + 60*0.3
        assert!((out - 53.0).abs() < 1e-9);
        assert_eq!(s.reference(Channel::Humidity), Some(out));
    }

    #[test]
    fn channels_are_independent() {
        let mut s = Smoother::default();
        s.smooth(Channel::Temperature, 25.0);
        // First reading on a different channel still passes through.
        assert_eq!(s.smooth(Channel::Humidity, 80.0), 80.0);
    }

    #[test]
    fn flush_clears_references() {
        let mut s = Smoother::default();
        s.smooth(Channel::Temperature, 25.0);
        s.flush();
        assert_eq!(s.reference(Channel::Temperature), None);
        assert_eq!(s.smooth(Channel::Temperature, 90.0), 90.0);
    }
}
