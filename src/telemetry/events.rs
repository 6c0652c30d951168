use crate::context::Verdict;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "json")]
use serde_json::json;

/// Events emitted by a gateway.
///
/// Admission and completion events describe individual calls; config events
/// describe the background reconfiguration loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A verdict was reached for a call.
    Admission(AdmissionEvent),
    /// A call was completed.
    Completion(CompletionEvent),
    /// The method registry was refreshed, or a refresh failed.
    Config(ConfigEvent),
}

/// Emitted once per admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionEvent {
    /// Path being admitted.
    pub path: String,
    /// Verdict handed to the caller.
    pub verdict: Verdict,
    /// Bounded admission hit its deadline.
    pub timed_out: bool,
    /// No method is registered for the path.
    pub unknown_path: bool,
}

/// Emitted once per completion of a registered path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    /// Completed path.
    pub path: String,
    /// Result code reported by the caller.
    pub code: i32,
    /// Time from admission to completion.
    pub elapsed: Duration,
    /// The completion stored its payload in the response cache.
    pub cached: bool,
}

/// Events from the reconfiguration loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    /// A provider result was merged into the registry.
    Reloaded {
        /// Methods created by this merge.
        added: usize,
        /// Methods whose settings changed.
        updated: usize,
        /// Entries that failed validation.
        skipped: usize,
    },
    /// The provider failed; the registry was left as it was.
    ProviderFailed {
        /// Rendered provider error.
        reason: String,
    },
}

impl fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayEvent::Admission(event) => write!(f, "Admission::{}", event),
            GatewayEvent::Completion(event) => write!(f, "Completion::{}", event),
            GatewayEvent::Config(event) => write!(f, "Config::{}", event),
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}", self.verdict, self.path)?;
        if self.timed_out {
            f.write_str(", timed_out")?;
        }
        if self.unknown_path {
            f.write_str(", unknown_path")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for CompletionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Done({}, code={}, elapsed={:?}", self.path, self.code, self.elapsed)?;
        if self.cached {
            f.write_str(", cached")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for ConfigEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigEvent::Reloaded { added, updated, skipped } => {
                write!(f, "Reloaded(added={}, updated={}, skipped={})", added, updated, skipped)
            }
            ConfigEvent::ProviderFailed { reason } => write!(f, "ProviderFailed({})", reason),
        }
    }
}

#[cfg_attr(not(feature = "json"), allow(dead_code))]
fn clamp_u64(val: u128) -> u64 {
    u64::try_from(val).unwrap_or(u64::MAX)
}

/// Flat JSON rendering of an event, one object per event.
#[cfg(feature = "json")]
pub fn event_to_json(event: &GatewayEvent) -> serde_json::Value {
    match event {
        GatewayEvent::Admission(a) => json!({
            "kind": "admission",
            "path": a.path,
            "verdict": a.verdict.to_string(),
            "timed_out": a.timed_out,
            "unknown_path": a.unknown_path,
        }),
        GatewayEvent::Completion(c) => json!({
            "kind": "completion",
            "path": c.path,
            "code": c.code,
            "elapsed_us": clamp_u64(c.elapsed.as_micros()),
            "cached": c.cached,
        }),
        GatewayEvent::Config(ConfigEvent::Reloaded { added, updated, skipped }) => json!({
            "kind": "config_reloaded",
            "added": added,
            "updated": updated,
            "skipped": skipped,
        }),
        GatewayEvent::Config(ConfigEvent::ProviderFailed { reason }) => json!({
            "kind": "provider_failed",
            "reason": reason,
        }),
    }
}
