//! Clock abstraction. The wall-clock reading drives QPS second boundaries and
//! cache expiry; the monotonic reading measures completion latency.
//!
//! Limiter pacing does not go through this trait: it runs on tokio's clock so
//! that paused-time tests stay deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since the unix epoch.
    fn now(&self) -> Duration;

    /// Time since an arbitrary fixed origin. Never goes backwards, so
    /// differences between two readings are true elapsed time.
    fn monotonic(&self) -> Duration;

    /// Whole unix seconds; the granularity of QPS snapshots and cache expiry.
    fn unix_seconds(&self) -> u64 {
        self.now().as_secs()
    }
}

/// Clock backed by `SystemTime` for wall time and `Instant` for elapsed time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
    }

    fn monotonic(&self) -> Duration {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        ORIGIN.get_or_init(Instant::now).elapsed()
    }
}

/// Manually driven clock for tests and simulations.
///
/// Clones share the same underlying time, so a test can hand one clone to the
/// gateway and advance the other.
#[derive(Debug, Clone)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
    elapsed: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock frozen at `start` since the unix epoch.
    pub fn new(start: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(to_nanos(start))),
            elapsed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Let `by` pass: both readings move forward.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(to_nanos(by), Ordering::SeqCst);
        self.elapsed.fetch_add(to_nanos(by), Ordering::SeqCst);
    }

    /// Step the wall clock to an absolute time, as an NTP correction would.
    /// The monotonic reading does not move.
    pub fn set(&self, to: Duration) {
        self.nanos.store(to_nanos(to), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        // 2021-01-01T00:00:00Z; any fixed, non-zero second works.
        Self::new(Duration::from_secs(1_609_459_200))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn monotonic(&self) -> Duration {
        Duration::from_nanos(self.elapsed.load(Ordering::SeqCst))
    }
}

fn to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_shares_state() {
        let clock = ManualClock::new(Duration::from_secs(10));
        let handle = clock.clone();
        handle.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Duration::from_millis(11_500));
        assert_eq!(clock.unix_seconds(), 11);

        handle.set(Duration::from_secs(3));
        assert_eq!(clock.unix_seconds(), 3);
        assert_eq!(clock.monotonic(), Duration::from_millis(1500));
    }

    #[test]
    fn system_clock_is_past_epoch() {
        assert!(SystemClock.unix_seconds() > 1_600_000_000);
    }

    #[test]
    fn system_monotonic_never_goes_back() {
        let first = SystemClock.monotonic();
        let second = SystemClock.monotonic();
        assert!(second >= first);
    }
}
