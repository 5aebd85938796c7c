//! Manually advanced monotonic clock for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use boot::Clock;

/// A [`Clock`] that only moves when a test tells it to.
#[derive(Debug, Default)]
pub struct TestClock(AtomicU64);

impl TestClock {
    pub fn new() -> TestClock {
        TestClock(AtomicU64::new(0))
    }

    pub fn advance_ms(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances() {
        let clock = TestClock::new();
        assert_eq!(clock.now_ms(), 0);
        clock.advance_ms(499);
        assert_eq!(clock.now_ms(), 499);
        clock.advance_ms(1);
        assert_eq!(clock.now_ms(), 500);
    }
}
