//! Injectable wall clock.
//!
//! Ping timestamps and RTT measurements read time through [`Clock`] so the
//! channel logic can be driven deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of microsecond timestamps.
pub trait Clock: Send + Sync + 'static {
    /// Microseconds since the Unix epoch.
    fn now_us(&self) -> u64;
}

/// Clock backed by [`std::time::SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_us)),
        }
    }

    pub fn advance_us(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_us(&self, value: u64) {
        self.now.store(value, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_us(), 1_000);

        clock.advance_us(250);
        assert_eq!(clock.now_us(), 1_250);

        let shared = clock.clone();
        shared.set_us(42);
        assert_eq!(clock.now_us(), 42);
    }

    #[test]
    fn test_system_clock_is_after_epoch() {
        // 2020-01-01 in microseconds
        assert!(SystemClock.now_us() > 1_577_836_800_000_000);
    }
}
