//! Registry of methods keyed by path.
//!
//! The registry lock guards the map and the gateway-wide throughput counter.
//! It is held only to resolve or insert a method; per-method work happens on
//! the returned `Arc<Method>` after the lock is released.

use crate::method::{Method, MethodOption, Reconfigured, Throughput};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

/// Counts from one [`MethodRegistry::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Paths seen for the first time.
    pub added: usize,
    /// Existing methods whose settings changed.
    pub updated: usize,
    /// Existing methods left as they were.
    pub unchanged: usize,
    /// Entries that failed validation.
    pub skipped: usize,
}

impl MergeReport {
    /// True when the merge changed nothing.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0
    }
}

#[derive(Debug, Default)]
struct Inner {
    methods: HashMap<String, Arc<Method>>,
    throughput: Throughput,
}

/// Path → [`Method`] map plus gateway-wide counters.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    inner: RwLock<Inner>,
}

impl MethodRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Method registered under `path`.
    pub fn resolve(&self, path: &str) -> Option<Arc<Method>> {
        self.read().methods.get(path).cloned()
    }

    /// Count one completion gateway-wide and resolve its method in the same
    /// critical section.
    pub fn record_completion(&self, path: &str, now_secs: u64) -> Option<Arc<Method>> {
        let mut inner = self.write();
        inner.throughput.record(now_secs);
        inner.methods.get(path).cloned()
    }

    /// Add or update one method per option; never removes anything.
    ///
    /// Existing methods are reconfigured in place without the registry lock.
    /// New methods are built outside the lock and inserted under it; if another
    /// merge inserted the same path meanwhile, that method is reconfigured
    /// instead.
    pub fn merge(&self, options: &[MethodOption], latency_capacity: usize) -> MergeReport {
        let mut report = MergeReport::default();
        for option in options {
            if let Some(method) = self.resolve(&option.path) {
                self.apply(&method, option, &mut report);
                continue;
            }

            let created = match Method::new(option, latency_capacity) {
                Ok(method) => Arc::new(method),
                Err(err) => {
                    warn!(target: "gatehouse::registry", error = %err, "skipping method option");
                    report.skipped += 1;
                    continue;
                }
            };

            let mut inner = self.write();
            match inner.methods.entry(option.path.clone()) {
                Entry::Occupied(existing) => {
                    let method = Arc::clone(existing.get());
                    drop(inner);
                    self.apply(&method, option, &mut report);
                }
                Entry::Vacant(slot) => {
                    slot.insert(created);
                    drop(inner);
                    info!(
                        target: "gatehouse::registry",
                        path = %option.path,
                        name = %option.name,
                        second_limit = option.second_limit,
                        "method added"
                    );
                    report.added += 1;
                }
            }
        }
        report
    }

    fn apply(&self, method: &Method, option: &MethodOption, report: &mut MergeReport) {
        match method.reconfigure(option) {
            Ok(Reconfigured::Updated) => {
                info!(
                    target: "gatehouse::registry",
                    path = %option.path,
                    second_limit = option.second_limit,
                    bucket_size = option.bucket_size,
                    cache_seconds = option.cache_seconds,
                    "method policy changed"
                );
                report.updated += 1;
            }
            Ok(Reconfigured::Unchanged) => report.unchanged += 1,
            Err(err) => {
                warn!(target: "gatehouse::registry", error = %err, "skipping method option");
                report.skipped += 1;
            }
        }
    }

    /// All methods, sorted by path.
    pub fn methods(&self) -> Vec<Arc<Method>> {
        let mut methods: Vec<Arc<Method>> = self.read().methods.values().cloned().collect();
        methods.sort_by(|a, b| a.path().cmp(b.path()));
        methods
    }

    /// Copy of the gateway-wide counter.
    pub fn throughput(&self) -> Throughput {
        self.read().throughput
    }

    pub fn len(&self) -> usize {
        self.read().methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().methods.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
