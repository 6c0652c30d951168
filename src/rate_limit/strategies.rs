use crate::rate_limit::{Decision, RateLimiter};
use async_trait::async_trait;
use std::num::NonZeroU32;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A token bucket rate limiter.
///
/// Tracked as a theoretical arrival time (`tat`): the instant at which the
/// bucket would be full again. A permit is available when
/// `tat - tolerance <= now`, where `tolerance` is `(burst - 1)` emission
/// intervals. Blocking acquisition reserves its slot up front and then sleeps,
/// so concurrent waiters are granted one interval apart in call order.
#[derive(Debug)]
pub struct TokenBucket {
    rate: u32,
    burst: u32,
    interval: Duration,
    tolerance: Duration,
    tat: Mutex<Option<Instant>>,
}

impl TokenBucket {
    /// Bucket granting `rate` permits per second with room for `burst`
    /// back-to-back permits. `burst` of 0 is treated as 1.
    pub fn new(rate: NonZeroU32, burst: u32) -> Self {
        let burst = burst.max(1);
        let interval = Duration::from_nanos((NANOS_PER_SEC / u64::from(rate.get())).max(1));
        let tolerance = interval.saturating_mul(burst - 1);
        Self { rate: rate.get(), burst, interval, tolerance, tat: Mutex::new(None) }
    }

    /// Time between two permits at the sustained rate.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Unconditionally reserve the next slot; returns how long to wait for it.
    fn reserve(&self, now: Instant) -> Duration {
        let mut tat = self.tat.lock().unwrap_or_else(PoisonError::into_inner);
        let current = tat.map_or(now, |t| t.max(now));
        let wait = self.wait_for(current, now);
        *tat = Some(current + self.interval);
        wait
    }

    fn wait_for(&self, tat: Instant, now: Instant) -> Duration {
        tat.checked_sub(self.tolerance)
            .map_or(Duration::ZERO, |allowed_at| allowed_at.saturating_duration_since(now))
    }

    fn remaining(&self, tat: Instant, now: Instant) -> u32 {
        let occupied = tat.saturating_duration_since(now).as_nanos();
        let step = self.interval.as_nanos();
        let used = (occupied + step - 1) / step;
        u32::try_from(u128::from(self.burst).saturating_sub(used)).unwrap_or(0)
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    fn try_acquire(&self) -> Decision {
        let now = Instant::now();
        let mut tat = self.tat.lock().unwrap_or_else(PoisonError::into_inner);
        let current = tat.map_or(now, |t| t.max(now));
        let wait = self.wait_for(current, now);
        if !wait.is_zero() {
            return Decision::Denied { wait };
        }
        let next = current + self.interval;
        *tat = Some(next);
        Decision::Allowed { remaining: self.remaining(next, now) }
    }

    async fn acquire(&self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn burst(&self) -> u32 {
        self.burst
    }
}
