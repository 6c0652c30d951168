//! Rate limiting primitives.
//!
//! - [`RateLimiter`]: the interface a method's gate consults.
//! - [`Decision`]: result of a non-blocking check.
//! - [`strategies::TokenBucket`]: the in-memory token bucket used for every
//!   limited method. A bucket of size 0 or 1 behaves as a strict leaky bucket.
//!
//! Each method owns its own limiter; there is no fairness between methods.

use std::time::Duration;

pub mod strategies;
pub use strategies::TokenBucket;

/// The decision returned by [`RateLimiter::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A permit was taken.
    Allowed {
        /// Permits still available right now.
        remaining: u32,
    },
    /// No permit is available; nothing was consumed.
    Denied {
        /// How long until the next permit frees up.
        wait: Duration,
    },
}

impl Decision {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Core interface for rate limiting logic.
#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Take a permit if one is available now, without waiting.
    fn try_acquire(&self) -> Decision;

    /// Take a permit, waiting as long as necessary.
    ///
    /// The permit is reserved when the call starts. If the returned future is
    /// dropped before it resolves, the reservation is not handed back.
    async fn acquire(&self);

    /// Sustained permits per second.
    fn rate(&self) -> u32;

    /// Permits that may be taken back-to-back from a rested limiter.
    fn burst(&self) -> u32;
}
