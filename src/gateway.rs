//! The admission/completion protocol.
//!
//! A [`Gateway`] owns the method registry, the shared response cache and the
//! background [`ConfigSync`] loop. Hosts call [`Gateway::admit`] (or one of its
//! bounded variants) before doing the work of a call and hand the resulting
//! [`Admission`] back to [`Gateway::complete`] afterwards, whatever the
//! verdict was, so histograms stay meaningful.
//!
//! ```rust
//! use gatehouse::{Gateway, MethodOption, Verdict};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let gateway = Gateway::new(vec![
//!     MethodOption::new("ping", "/ping"),
//!     MethodOption::new("maintenance", "/admin").second_limit(-1),
//! ]);
//!
//! let admission = gateway.admit("/ping").await;
//! assert_eq!(admission.verdict(), Verdict::Admit);
//! let done = gateway.complete(admission, 200, None).unwrap();
//! assert_eq!(done.total, 1);
//!
//! assert_eq!(gateway.admit("/admin").await.verdict(), Verdict::Reject);
//! # }
//! ```

use crate::cache::ResponseCache;
use crate::clock::{Clock, SystemClock};
use crate::context::{Admission, Call, Completion, Verdict};
use crate::latency::{LatencyStats, DEFAULT_LATENCY_CAPACITY};
use crate::method::{Gate, Method, MethodOption};
use crate::provider::MethodProvider;
use crate::rate_limit::{Decision, RateLimiter};
use crate::registry::{MergeReport, MethodRegistry};
use crate::sync::ConfigSync;
use crate::telemetry::{
    AdmissionEvent, CompletionEvent, ConfigEvent, EventEmitter, GatewayEvent,
};
use crate::GatewayError;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Queue length between the gateway and its telemetry sink by default.
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 1024;

/// What admission does with a path no method is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownPathPolicy {
    /// Admit, flagging the admission as unknown.
    #[default]
    Admit,
    /// Reject, flagging the admission as unknown.
    Reject,
}

type EmitterFactory = Box<dyn FnOnce(usize) -> EventEmitter + Send>;

/// Shared state behind every [`Gateway`] clone and the sync task.
pub(crate) struct Core {
    registry: MethodRegistry,
    cache: ResponseCache,
    clock: Arc<dyn Clock>,
    provider: Option<Arc<dyn MethodProvider>>,
    emitter: Option<EventEmitter>,
    latency_capacity: usize,
    unknown_paths: UnknownPathPolicy,
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("methods", &self.registry.len())
            .field("cache_entries", &self.cache.len())
            .field("clock", &self.clock)
            .field("has_provider", &self.provider.is_some())
            .field("emitter", &self.emitter)
            .field("latency_capacity", &self.latency_capacity)
            .field("unknown_paths", &self.unknown_paths)
            .finish()
    }
}

impl Core {
    fn emit(&self, event: impl FnOnce() -> GatewayEvent) {
        if let Some(emitter) = &self.emitter {
            emitter.emit(event());
        }
    }

    /// Load the provider and merge its result. Expired cache entries are
    /// swept on the way.
    pub(crate) async fn refresh(&self) -> Result<MergeReport, GatewayError> {
        self.cache.purge_expired(self.clock.unix_seconds());

        let Some(provider) = &self.provider else {
            return Ok(MergeReport::default());
        };

        let options = match provider.load().await {
            Ok(options) => options,
            Err(err) => {
                warn!(
                    target: "gatehouse::provider",
                    error = %err,
                    "provider failed; keeping current methods"
                );
                self.emit(|| {
                    GatewayEvent::Config(ConfigEvent::ProviderFailed { reason: err.to_string() })
                });
                return Err(err.into());
            }
        };

        let report = self.registry.merge(&options, self.latency_capacity);
        debug!(
            target: "gatehouse::sync",
            added = report.added,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            "methods refreshed"
        );
        self.emit(|| {
            GatewayEvent::Config(ConfigEvent::Reloaded {
                added: report.added,
                updated: report.updated,
                skipped: report.skipped,
            })
        });
        Ok(report)
    }
}

/// Where admission stands after the checks that never wait.
enum Screened {
    Decided(Admission, Option<Arc<Method>>),
    Limited(Admission, Arc<Method>, Arc<dyn RateLimiter>),
}

/// Admission-control and telemetry gateway. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Gateway {
    core: Arc<Core>,
    sync: Arc<ConfigSync>,
}

impl Gateway {
    /// Gateway over a fixed method list, with default settings and no
    /// background loop.
    pub fn new(options: Vec<MethodOption>) -> Self {
        let (core, _) = GatewayBuilder::new().methods(options).assemble();
        Self { core: Arc::new(core), sync: Arc::new(ConfigSync::idle()) }
    }

    /// Start configuring a gateway.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Admit a call, waiting on the method's limiter as long as it takes.
    pub async fn admit(&self, call: impl Into<Call>) -> Admission {
        match self.screen(call.into()) {
            Screened::Decided(admission, method) => self.decide(admission, method.as_deref()),
            Screened::Limited(mut admission, method, limiter) => {
                limiter.acquire().await;
                admission.verdict = Verdict::Admit;
                self.decide(admission, Some(&*method))
            }
        }
    }

    /// Admit a call, giving up after `timeout`.
    ///
    /// The limiter wait runs on its own task. When the deadline wins, the
    /// verdict is [`Verdict::Busy`] with `timed_out` set, and the permit the
    /// abandoned wait eventually takes is not returned to the bucket.
    pub async fn admit_with_timeout(&self, call: impl Into<Call>, timeout: Duration) -> Admission {
        match self.screen(call.into()) {
            Screened::Decided(admission, method) => self.decide(admission, method.as_deref()),
            Screened::Limited(mut admission, method, limiter) => {
                admission.timeout = Some(timeout);
                let grant = tokio::spawn(async move { limiter.acquire().await });
                match tokio::time::timeout(timeout, grant).await {
                    Ok(Ok(())) => admission.verdict = Verdict::Admit,
                    Ok(Err(err)) => {
                        warn!(
                            target: "gatehouse::gateway",
                            path = %admission.path,
                            error = %err,
                            "limiter wait failed"
                        );
                        admission.verdict = Verdict::Busy;
                    }
                    Err(_) => {
                        debug!(
                            target: "gatehouse::gateway",
                            path = %admission.path,
                            timeout = ?timeout,
                            "admission timed out"
                        );
                        admission.verdict = Verdict::Busy;
                        admission.timed_out = true;
                    }
                }
                self.decide(admission, Some(&*method))
            }
        }
    }

    /// Admit a call without waiting: over-rate calls get [`Verdict::Busy`].
    pub fn try_admit(&self, call: impl Into<Call>) -> Admission {
        match self.screen(call.into()) {
            Screened::Decided(admission, method) => self.decide(admission, method.as_deref()),
            Screened::Limited(mut admission, method, limiter) => {
                admission.verdict = match limiter.try_acquire() {
                    Decision::Allowed { .. } => Verdict::Admit,
                    Decision::Denied { .. } => Verdict::Busy,
                };
                self.decide(admission, Some(&*method))
            }
        }
    }

    fn screen(&self, call: Call) -> Screened {
        let core = &self.core;
        let mut admission = Admission::new(call, core.clock.now(), core.clock.monotonic());

        let Some(method) = core.registry.resolve(&admission.path) else {
            admission.unknown_path = true;
            admission.verdict = match core.unknown_paths {
                UnknownPathPolicy::Admit => Verdict::Admit,
                UnknownPathPolicy::Reject => Verdict::Reject,
            };
            debug!(
                target: "gatehouse::gateway",
                path = %admission.path,
                verdict = %admission.verdict,
                "unknown path"
            );
            return Screened::Decided(admission, None);
        };

        let policy = method.policy();
        if matches!(policy.gate, Gate::Disabled) {
            admission.verdict = Verdict::Reject;
            return Screened::Decided(admission, Some(method));
        }

        if policy.cache_ttl().is_some() {
            if let Some(key) = admission.cache_key.as_deref() {
                if let Some(data) = core.cache.get(key, core.clock.unix_seconds()) {
                    admission.verdict = Verdict::CacheHit;
                    admission.cached = Some(data);
                    return Screened::Decided(admission, Some(method));
                }
            }
        }

        match &policy.gate {
            Gate::Limited(limiter) => {
                let limiter = Arc::clone(limiter);
                Screened::Limited(admission, method, limiter)
            }
            Gate::Unlimited | Gate::Disabled => {
                admission.verdict = Verdict::Admit;
                Screened::Decided(admission, Some(method))
            }
        }
    }

    fn decide(&self, admission: Admission, method: Option<&Method>) -> Admission {
        if let Some(method) = method {
            method.set_status(admission.verdict);
        }
        self.core.emit(|| {
            GatewayEvent::Admission(AdmissionEvent {
                path: admission.path.clone(),
                verdict: admission.verdict,
                timed_out: admission.timed_out,
                unknown_path: admission.unknown_path,
            })
        });
        admission
    }

    /// Record the outcome of an admitted call.
    ///
    /// Gateway-wide counters move even for unknown paths; the method's
    /// counters, code histogram and latency window move only for registered
    /// ones. When the method caches, `code` matches its success code, the call
    /// carried a cache key and was not itself a cache hit, `payload` is stored.
    pub fn complete(
        &self,
        admission: Admission,
        code: i32,
        payload: Option<Bytes>,
    ) -> Result<Completion, GatewayError> {
        let core = &self.core;
        let now_secs = core.clock.unix_seconds();

        let Some(method) = core.registry.record_completion(&admission.path, now_secs) else {
            debug!(
                target: "gatehouse::gateway",
                path = %admission.path,
                "completion for unknown path"
            );
            return Err(GatewayError::UnknownPath { path: admission.path });
        };

        let elapsed = core.clock.monotonic().saturating_sub(admission.started);
        let policy = method.policy();
        let mut state = method.lock();
        state.record(now_secs, code, elapsed);

        let mut cached = false;
        if admission.verdict != Verdict::CacheHit && code == policy.success_code {
            if let (Some(ttl), Some(key), Some(data)) =
                (policy.cache_ttl(), admission.cache_key.as_deref(), payload)
            {
                core.cache.insert(key, data, now_secs.saturating_add(ttl.as_secs()));
                cached = true;
            }
        }

        let completion =
            Completion { elapsed, qps: state.throughput.qps(), total: state.throughput.total() };
        drop(state);

        core.emit(|| {
            GatewayEvent::Completion(CompletionEvent {
                path: admission.path.clone(),
                code,
                elapsed,
                cached,
            })
        });
        Ok(completion)
    }

    /// Point-in-time copy of every counter. Percentiles are computed on the
    /// copy after each method lock is released.
    pub fn snapshot(&self) -> Snapshot {
        let registry = &self.core.registry;
        let throughput = registry.throughput();
        let methods = registry
            .methods()
            .into_iter()
            .map(|method| {
                let policy = method.policy();
                let (qps, total, samples, codes) = {
                    let state = method.lock();
                    (
                        state.throughput.qps(),
                        state.throughput.total(),
                        state.latency.to_vec(),
                        state.codes.clone(),
                    )
                };
                MethodSnapshot {
                    name: policy.name.clone(),
                    path: method.path().to_string(),
                    second_limit: policy.limit.as_raw(),
                    bucket_size: policy.bucket_size,
                    cache_seconds: policy.cache_seconds,
                    success_code: policy.success_code,
                    status: method.status(),
                    qps,
                    total,
                    latency: LatencyStats::from_samples(samples),
                    codes,
                }
            })
            .collect();
        Snapshot { qps: throughput.qps(), total: throughput.total(), methods }
    }

    /// Run one provider merge now. Without a provider this only sweeps the
    /// cache and reports nothing merged.
    pub async fn reload(&self) -> Result<MergeReport, GatewayError> {
        self.core.refresh().await
    }

    /// Stop the background loop. Safe to call any number of times.
    pub fn shutdown(&self) {
        if self.sync.stop() {
            debug!(target: "gatehouse::gateway", "shutdown requested");
        }
    }

    /// Background loop handle.
    pub fn config_sync(&self) -> &ConfigSync {
        &self.sync
    }

    /// Shared response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.core.cache
    }

    /// Registered method for `path`.
    pub fn method(&self, path: &str) -> Option<Arc<Method>> {
        self.core.registry.resolve(path)
    }

    /// Telemetry events lost to a full queue.
    pub fn dropped_events(&self) -> u64 {
        self.core.emitter.as_ref().map_or(0, EventEmitter::dropped)
    }
}

/// Gateway-wide snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Snapshot {
    /// Completions over the last closed second, all paths.
    pub qps: u64,
    /// Completions so far, all paths.
    pub total: u64,
    /// One entry per method, sorted by path.
    pub methods: Vec<MethodSnapshot>,
}

impl Snapshot {
    /// Entry for `path`.
    pub fn method(&self, path: &str) -> Option<&MethodSnapshot> {
        self.methods.iter().find(|m| m.path == path)
    }
}

/// Per-method part of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MethodSnapshot {
    /// Display name.
    pub name: String,
    /// Registry key.
    pub path: String,
    /// `-1` rejects all, `0` is unlimited, otherwise permits per second.
    pub second_limit: i32,
    /// Limiter burst.
    pub bucket_size: u32,
    /// Cache lifetime in seconds; `0` disables caching.
    pub cache_seconds: u64,
    /// Completion code whose payloads are cached.
    pub success_code: i32,
    /// Verdict of the latest admission.
    pub status: Verdict,
    /// Completions over the last closed second.
    pub qps: u64,
    /// Completions so far.
    pub total: u64,
    /// `None` until the first completion.
    pub latency: Option<LatencyStats>,
    /// Completion count per result code.
    pub codes: BTreeMap<i32, u64>,
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    methods: Vec<MethodOption>,
    provider: Option<Arc<dyn MethodProvider>>,
    refresh_interval: Option<Duration>,
    clock: Arc<dyn Clock>,
    latency_capacity: usize,
    unknown_paths: UnknownPathPolicy,
    telemetry: Option<EmitterFactory>,
    telemetry_capacity: usize,
}

impl fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("methods", &self.methods)
            .field("has_provider", &self.provider.is_some())
            .field("refresh_interval", &self.refresh_interval)
            .field("clock", &self.clock)
            .field("latency_capacity", &self.latency_capacity)
            .field("unknown_paths", &self.unknown_paths)
            .field("has_telemetry", &self.telemetry.is_some())
            .field("telemetry_capacity", &self.telemetry_capacity)
            .finish()
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
            provider: None,
            refresh_interval: None,
            clock: Arc::new(SystemClock),
            latency_capacity: DEFAULT_LATENCY_CAPACITY,
            unknown_paths: UnknownPathPolicy::default(),
            telemetry: None,
            telemetry_capacity: DEFAULT_TELEMETRY_CAPACITY,
        }
    }

    /// Methods registered before the provider is first consulted.
    pub fn methods(mut self, options: impl IntoIterator<Item = MethodOption>) -> Self {
        self.methods.extend(options);
        self
    }

    /// Register one method.
    pub fn method(mut self, option: MethodOption) -> Self {
        self.methods.push(option);
        self
    }

    /// Source of method definitions; loaded once by [`build`](Self::build).
    pub fn provider(mut self, provider: impl MethodProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Reload the provider every `interval`. Zero disables the loop.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Clock for QPS seconds, cache expiry and (through its monotonic
    /// reading) latency.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Latency samples kept per method (at least one).
    pub fn latency_capacity(mut self, capacity: usize) -> Self {
        self.latency_capacity = capacity.max(1);
        self
    }

    pub fn unknown_paths(mut self, policy: UnknownPathPolicy) -> Self {
        self.unknown_paths = policy;
        self
    }

    /// Deliver [`GatewayEvent`]s to `sink` from a background task.
    pub fn telemetry<S>(mut self, sink: S) -> Self
    where
        S: tower::Service<GatewayEvent, Response = ()> + Send + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        self.telemetry = Some(Box::new(move |capacity| EventEmitter::spawn(sink, capacity)));
        self
    }

    /// Events buffered for the sink before new ones are dropped.
    pub fn telemetry_capacity(mut self, capacity: usize) -> Self {
        self.telemetry_capacity = capacity.max(1);
        self
    }

    fn assemble(self) -> (Core, Option<Duration>) {
        let registry = MethodRegistry::new();
        if !self.methods.is_empty() {
            registry.merge(&self.methods, self.latency_capacity);
        }
        let emitter = self.telemetry.map(|spawn| spawn(self.telemetry_capacity));
        let core = Core {
            registry,
            cache: ResponseCache::new(),
            clock: self.clock,
            provider: self.provider,
            emitter,
            latency_capacity: self.latency_capacity,
            unknown_paths: self.unknown_paths,
        };
        (core, self.refresh_interval)
    }

    /// Build the gateway: register static methods, load the provider once and
    /// start the refresh loop when an interval is set.
    ///
    /// A failing first load leaves only the static methods registered; the
    /// loop keeps retrying on its schedule. Must run inside a tokio runtime.
    pub async fn build(self) -> Gateway {
        let (core, interval) = self.assemble();
        let core = Arc::new(core);

        if core.provider.is_some() {
            // errors are logged and reported inside refresh
            let _ = core.refresh().await;
        }

        let sync = match interval {
            Some(period) if core.provider.is_some() && !period.is_zero() => {
                ConfigSync::spawn(Arc::clone(&core), period)
            }
            _ => ConfigSync::idle(),
        };
        Gateway { core, sync: Arc::new(sync) }
    }
}
