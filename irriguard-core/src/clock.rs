//! Time sources for the ingestion pipeline
//!
//! Provides a clock abstraction so components that need "now" (timestamp
//! fallback, persistence staleness, the synthetic engine tick) can run
//! against wall-clock time in production and a scripted clock in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Timestamp in milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Source of time for the pipeline
pub trait Clock: Send + Sync {
    /// Get current timestamp in milliseconds
    fn now(&self) -> Timestamp;

    /// Check if this source provides wall clock time (vs scripted)
    fn is_wall_clock(&self) -> bool;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }

    fn is_wall_clock(&self) -> bool {
        (**self).is_wall_clock()
    }
}

/// System wall-clock time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime, UNIX_EPOCH};

        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }

    fn is_wall_clock(&self) -> bool {
        true
    }
}

/// Scripted time source for testing
///
/// Advances only when told to, so tests can replay exact sample cadences.
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicU64,
}

impl FixedClock {
    /// Create a clock frozen at the given timestamp
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            millis: AtomicU64::new(timestamp),
        }
    }

    /// Jump to an absolute timestamp
    pub fn set(&self, timestamp: Timestamp) {
        self.millis.store(timestamp, Ordering::Relaxed);
    }

    /// Advance the clock by `ms` milliseconds
    pub fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.millis.load(Ordering::Relaxed)
    }

    fn is_wall_clock(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(1000);
        assert_eq!(clock.now(), 1000);

        clock.advance(500);
        assert_eq!(clock.now(), 1500);

        clock.set(10_000);
        assert_eq!(clock.now(), 10_000);
    }

    #[test]
    fn shared_clock_stays_in_sync() {
        let clock = Arc::new(FixedClock::new(0));
        let handle: Arc<dyn Clock> = clock.clone();

        clock.advance(250);
        assert_eq!(handle.now(), 250);
        assert!(!handle.is_wall_clock());
    }

    #[test]
    fn system_clock_is_wall_clock() {
        let clock = SystemClock;
        assert!(clock.is_wall_clock());
        assert!(clock.now() > 0);
    }
}
