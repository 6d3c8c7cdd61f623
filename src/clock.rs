//! Time source for the node.
//!
//! All timestamps in this crate are Unix milliseconds. The node reads time
//! through [`Clock`] so retention and session timing can be driven by a
//! [`ManualClock`] in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
pub type Millis = u64;

/// Milliseconds in one day (retention arithmetic).
pub const MILLIS_PER_DAY: u64 = 86_400_000;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> Millis;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        // A clock before the epoch reads as 0 rather than failing the caller.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Logical clock advanced explicitly.
///
/// Clones share the same underlying time, so a test can keep one handle
/// and give another to the node.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock starting at `start` milliseconds.
    pub fn new(start: Millis) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, millis: Millis) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(1_000);
        let handle = clock.clone();

        handle.advance(500);
        assert_eq!(clock.now_millis(), 1_500);

        clock.set(10);
        assert_eq!(handle.now_millis(), 10);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
