//! Per-path policy and runtime state.
//!
//! A [`Method`] is created the first time configuration mentions its path and
//! is then updated in place for the life of the gateway. Its policy and limiter
//! travel together inside one [`MethodPolicy`] published through
//! [`DynamicConfig`], so admission never sees a limit paired with the wrong
//! limiter.

use crate::adaptive::DynamicConfig;
use crate::context::Verdict;
use crate::latency::LatencyWindow;
use crate::rate_limit::{RateLimiter, TokenBucket};
use crate::GatewayError;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Completion code treated as cacheable when an option does not name one.
pub const DEFAULT_SUCCESS_CODE: i32 = 200;

/// One method definition as supplied by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodOption {
    /// Display name.
    pub name: String,
    /// Registry key.
    pub path: String,
    /// `-1` rejects everything, `0` is unlimited, `>0` is requests per second.
    pub second_limit: i32,
    /// Burst allowance of the limiter; 0 and 1 both mean no burst.
    #[cfg_attr(feature = "serde", serde(default))]
    pub bucket_size: u32,
    /// Cache lifetime in seconds; 0 disables caching.
    #[cfg_attr(feature = "serde", serde(default))]
    pub cache_seconds: u64,
    /// Completion code whose payload may be cached.
    #[cfg_attr(feature = "serde", serde(default = "default_success_code"))]
    pub success_code: i32,
}

#[cfg(feature = "serde")]
fn default_success_code() -> i32 {
    DEFAULT_SUCCESS_CODE
}

impl MethodOption {
    /// Unlimited, uncached method.
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            second_limit: 0,
            bucket_size: 0,
            cache_seconds: 0,
            success_code: DEFAULT_SUCCESS_CODE,
        }
    }

    /// Set the per-second limit (`-1`, `0` or a positive rate).
    pub fn second_limit(mut self, limit: i32) -> Self {
        self.second_limit = limit;
        self
    }

    /// Set the limiter burst allowance.
    pub fn bucket_size(mut self, size: u32) -> Self {
        self.bucket_size = size;
        self
    }

    /// Enable response caching for `seconds`.
    pub fn cache_seconds(mut self, seconds: u64) -> Self {
        self.cache_seconds = seconds;
        self
    }

    /// Set the cacheable completion code.
    pub fn success_code(mut self, code: i32) -> Self {
        self.success_code = code;
        self
    }

    /// Reject entries the registry cannot hold.
    pub fn validate(&self) -> Result<RateLimit, GatewayError> {
        if self.path.trim().is_empty() {
            return Err(GatewayError::InvalidOption {
                path: self.path.clone(),
                reason: "path must not be empty".into(),
            });
        }
        RateLimit::from_raw(self.second_limit).ok_or_else(|| GatewayError::InvalidOption {
            path: self.path.clone(),
            reason: format!("second_limit must be >= -1 (got {})", self.second_limit),
        })
    }
}

/// Typed form of `second_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimit {
    /// Degraded: every admission is rejected.
    Disabled,
    /// No limiter.
    Unlimited,
    /// Token bucket at this many permits per second.
    PerSecond(NonZeroU32),
}

impl RateLimit {
    /// Parse the raw configuration value; `None` below `-1`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(Self::Disabled),
            0 => Some(Self::Unlimited),
            n => u32::try_from(n).ok().and_then(NonZeroU32::new).map(Self::PerSecond),
        }
    }

    /// Raw configuration value.
    pub fn as_raw(&self) -> i32 {
        match self {
            Self::Disabled => -1,
            Self::Unlimited => 0,
            Self::PerSecond(n) => i32::try_from(n.get()).unwrap_or(i32::MAX),
        }
    }
}

/// What admission consults; the limiter exists only for limited methods.
#[derive(Debug, Clone)]
pub enum Gate {
    /// Reject every call.
    Disabled,
    /// Admit every call.
    Unlimited,
    /// Admit as the limiter allows.
    Limited(Arc<dyn RateLimiter>),
}

/// Immutable policy snapshot of one method.
#[derive(Debug, Clone)]
pub struct MethodPolicy {
    /// Display name; may change on reconfiguration.
    pub name: String,
    /// Configured limit.
    pub limit: RateLimit,
    /// Configured burst.
    pub bucket_size: u32,
    /// Configured cache lifetime in seconds.
    pub cache_seconds: u64,
    /// Cacheable completion code.
    pub success_code: i32,
    /// Limiter matching `limit`.
    pub gate: Gate,
}

impl MethodPolicy {
    /// Build a policy, reusing `previous`'s limiter when rate and burst are
    /// unchanged so a refresh does not reset the bucket.
    fn build(option: &MethodOption, limit: RateLimit, previous: Option<&MethodPolicy>) -> Self {
        let gate = match limit {
            RateLimit::Disabled => Gate::Disabled,
            RateLimit::Unlimited => Gate::Unlimited,
            RateLimit::PerSecond(rate) => match previous {
                Some(prev) if prev.limit == limit && prev.bucket_size == option.bucket_size => {
                    prev.gate.clone()
                }
                _ => Gate::Limited(Arc::new(TokenBucket::new(rate, option.bucket_size))),
            },
        };
        Self {
            name: option.name.clone(),
            limit,
            bucket_size: option.bucket_size,
            cache_seconds: option.cache_seconds,
            success_code: option.success_code,
            gate,
        }
    }

    /// Cache lifetime, when caching is enabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_seconds > 0).then(|| Duration::from_secs(self.cache_seconds))
    }

    fn same_settings(&self, other: &MethodPolicy) -> bool {
        self.name == other.name
            && self.limit == other.limit
            && self.bucket_size == other.bucket_size
            && self.cache_seconds == other.cache_seconds
            && self.success_code == other.success_code
    }
}

/// Completion counter with a whole-second QPS snapshot.
///
/// `qps` is the number of completions counted between the last two second
/// boundaries crossed by a completion; it is never extrapolated and goes stale
/// while no completions arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throughput {
    total: u64,
    qps: u64,
    last_total: u64,
    last_second: u64,
}

impl Throughput {
    /// Count one completion observed at unix second `now_secs`.
    pub fn record(&mut self, now_secs: u64) {
        self.total += 1;
        if now_secs > self.last_second {
            self.qps = self.total - self.last_total;
            self.last_second = now_secs;
            self.last_total = self.total;
        }
    }

    /// Completions counted so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Rate over the most recently closed second.
    pub fn qps(&self) -> u64 {
        self.qps
    }
}

/// Mutable counters guarded by the method lock.
#[derive(Debug)]
pub(crate) struct MethodState {
    pub(crate) throughput: Throughput,
    pub(crate) latency: LatencyWindow,
    pub(crate) codes: BTreeMap<i32, u64>,
}

impl MethodState {
    pub(crate) fn record(&mut self, now_secs: u64, code: i32, elapsed: Duration) {
        self.throughput.record(now_secs);
        *self.codes.entry(code).or_insert(0) += 1;
        self.latency.record(elapsed);
    }
}

/// Outcome of applying an option to an existing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconfigured {
    /// Nothing differed.
    Unchanged,
    /// New settings were published.
    Updated,
}

/// A named operation: its policy and accumulated statistics.
#[derive(Debug)]
pub struct Method {
    path: String,
    policy: DynamicConfig<MethodPolicy>,
    status: AtomicU8,
    state: Mutex<MethodState>,
}

impl Method {
    /// Create a method from a validated option.
    pub fn new(option: &MethodOption, latency_capacity: usize) -> Result<Self, GatewayError> {
        let limit = option.validate()?;
        Ok(Self {
            path: option.path.clone(),
            policy: DynamicConfig::new(MethodPolicy::build(option, limit, None)),
            status: AtomicU8::new(Verdict::Admit.to_u8()),
            state: Mutex::new(MethodState {
                throughput: Throughput::default(),
                latency: LatencyWindow::new(latency_capacity),
                codes: BTreeMap::new(),
            }),
        })
    }

    /// Registry key; fixed at creation.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current policy snapshot.
    pub fn policy(&self) -> Arc<MethodPolicy> {
        self.policy.get()
    }

    /// Verdict of the latest admission.
    pub fn status(&self) -> Verdict {
        Verdict::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub(crate) fn set_status(&self, verdict: Verdict) {
        self.status.store(verdict.to_u8(), Ordering::Relaxed);
    }

    /// Apply new settings in place. Counters and samples are kept.
    ///
    /// Runs under the method lock so concurrent reconfigurations of the same
    /// method serialize; readers keep using whichever snapshot they loaded.
    pub fn reconfigure(&self, option: &MethodOption) -> Result<Reconfigured, GatewayError> {
        let limit = option.validate()?;
        let _state = self.lock();
        let current = self.policy.get();
        let next = MethodPolicy::build(option, limit, Some(&current));
        if next.same_settings(&current) {
            return Ok(Reconfigured::Unchanged);
        }
        self.policy.replace(next);
        Ok(Reconfigured::Updated)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MethodState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
