//! Bounded latency samples and their aggregates.
//!
//! Completion pushes into a [`LatencyWindow`] in O(1); aggregation happens only
//! when a snapshot asks for it, on a copy taken outside the method lock.

use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept per method unless the gateway is built with another capacity.
pub const DEFAULT_LATENCY_CAPACITY: usize = 10_000;

/// FIFO buffer of the most recent completion latencies.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    /// Window holding at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        // Grow lazily; most methods never see the full capacity.
        Self { samples: VecDeque::with_capacity(capacity.min(128)), capacity }
    }

    /// Append a sample, evicting the oldest once the window is full.
    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Copy of the samples, oldest first.
    pub fn to_vec(&self) -> Vec<Duration> {
        self.samples.iter().copied().collect()
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_CAPACITY)
    }
}

/// Aggregates over one window of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LatencyStats {
    /// Number of samples the aggregates were computed from.
    pub count: usize,
    /// Fastest sample.
    #[cfg_attr(feature = "serde", serde(rename = "min_us", with = "micros"))]
    pub min: Duration,
    /// Slowest sample.
    #[cfg_attr(feature = "serde", serde(rename = "max_us", with = "micros"))]
    pub max: Duration,
    /// Arithmetic mean.
    #[cfg_attr(feature = "serde", serde(rename = "avg_us", with = "micros"))]
    pub avg: Duration,
    /// 90th percentile.
    #[cfg_attr(feature = "serde", serde(rename = "p90_us", with = "micros"))]
    pub p90: Duration,
    /// 95th percentile.
    #[cfg_attr(feature = "serde", serde(rename = "p95_us", with = "micros"))]
    pub p95: Duration,
}

impl LatencyStats {
    /// Sort `samples` in place and aggregate them. `None` when empty.
    pub fn from_samples(mut samples: Vec<Duration>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let count = samples.len();
        let total: u128 = samples.iter().map(Duration::as_nanos).sum();
        let avg = u64::try_from(total / count as u128).unwrap_or(u64::MAX);

        Some(Self {
            count,
            min: samples[0],
            max: samples[count - 1],
            avg: Duration::from_nanos(avg),
            p90: percentile(&samples, 0.90),
            p95: percentile(&samples, 0.95),
        })
    }
}

/// `sorted[floor(len * q)]`, clamped to the last sample.
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    let index = (sorted.len() as f64 * q) as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(feature = "serde")]
mod micros {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }
}
