//! Per-call values exchanged between the host and the gateway.
//!
//! A [`Call`] describes what is being admitted; the resulting [`Admission`] is
//! owned by the caller until it is handed back to
//! [`Gateway::complete`](crate::Gateway::complete), which consumes it.

use crate::GatewayError;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

const VERDICT_ADMIT: u8 = 0;
const VERDICT_REJECT: u8 = 1;
const VERDICT_BUSY: u8 = 2;
const VERDICT_CACHE_HIT: u8 = 3;

/// Outcome of admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Verdict {
    /// Proceed with the real work.
    Admit,
    /// The method is degraded; do not proceed.
    Reject,
    /// Rate limited past the caller's patience; do not proceed.
    Busy,
    /// Serve the cached payload instead of doing the work.
    CacheHit,
}

impl Verdict {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Verdict::Admit => VERDICT_ADMIT,
            Verdict::Reject => VERDICT_REJECT,
            Verdict::Busy => VERDICT_BUSY,
            Verdict::CacheHit => VERDICT_CACHE_HIT,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            VERDICT_REJECT => Verdict::Reject,
            VERDICT_BUSY => Verdict::Busy,
            VERDICT_CACHE_HIT => Verdict::CacheHit,
            _ => Verdict::Admit,
        }
    }

    /// Whether the caller may answer the call (by working or from cache).
    pub fn proceeds(&self) -> bool {
        matches!(self, Verdict::Admit | Verdict::CacheHit)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Admit => "admit",
            Verdict::Reject => "reject",
            Verdict::Busy => "busy",
            Verdict::CacheHit => "cache_hit",
        };
        f.write_str(s)
    }
}

/// Description of an incoming call.
///
/// ```rust
/// use gatehouse::Call;
///
/// let call = Call::new("/catalog").cache_key("catalog:page=1").access_id("req-42");
/// assert_eq!(call.path(), "/catalog");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    path: String,
    cache_key: Option<String>,
    access_id: Option<String>,
}

impl Call {
    /// Call to `path` with no cache key or identity.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), cache_key: None, access_id: None }
    }

    /// Key under which this call's response may be cached.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Caller-supplied identity carried through to completion.
    pub fn access_id(mut self, id: impl Into<String>) -> Self {
        self.access_id = Some(id.into());
        self
    }

    /// Target path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl From<&str> for Call {
    fn from(path: &str) -> Self {
        Call::new(path)
    }
}

impl From<String> for Call {
    fn from(path: String) -> Self {
        Call::new(path)
    }
}

/// The admission record of one call.
#[derive(Debug, Clone)]
pub struct Admission {
    pub(crate) path: String,
    pub(crate) cache_key: Option<String>,
    pub(crate) access_id: Option<String>,
    pub(crate) accessed_at: Duration,
    pub(crate) started: Duration,
    pub(crate) verdict: Verdict,
    pub(crate) cached: Option<Bytes>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) timed_out: bool,
    pub(crate) unknown_path: bool,
    attributes: HashMap<String, String>,
}

impl Admission {
    pub(crate) fn new(call: Call, accessed_at: Duration, started: Duration) -> Self {
        Self {
            path: call.path,
            cache_key: call.cache_key,
            access_id: call.access_id,
            accessed_at,
            started,
            verdict: Verdict::Admit,
            cached: None,
            timeout: None,
            timed_out: false,
            unknown_path: false,
            attributes: HashMap::new(),
        }
    }

    /// Path the call was admitted for.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Cache key supplied with the call.
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    /// Identity supplied with the call.
    pub fn access_id(&self) -> Option<&str> {
        self.access_id.as_deref()
    }

    /// Wall-clock reading (since the unix epoch) when admission started.
    pub fn accessed_at(&self) -> Duration {
        self.accessed_at
    }

    /// Admission verdict.
    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// Cached payload on a [`Verdict::CacheHit`].
    pub fn cached(&self) -> Option<&Bytes> {
        self.cached.as_ref()
    }

    /// True when bounded admission hit its deadline.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// True when no method is registered for the path.
    pub fn is_unknown_path(&self) -> bool {
        self.unknown_path
    }

    /// Attach caller-defined data.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Read caller-defined data.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Map non-proceeding verdicts to errors.
    ///
    /// `Busy` after a deadline becomes [`GatewayError::AdmissionTimeout`];
    /// `Reject` and a non-waiting `Busy` become [`GatewayError::Rejected`].
    pub fn check(&self) -> Result<(), GatewayError> {
        match self.verdict {
            Verdict::Admit | Verdict::CacheHit => Ok(()),
            Verdict::Busy if self.timed_out => Err(GatewayError::AdmissionTimeout {
                path: self.path.clone(),
                timeout: self.timeout.unwrap_or_default(),
            }),
            Verdict::Busy | Verdict::Reject => {
                Err(GatewayError::Rejected { path: self.path.clone() })
            }
        }
    }
}

/// Result of [`Gateway::complete`](crate::Gateway::complete).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Time from admission to completion.
    pub elapsed: Duration,
    /// The method's QPS over its last closed second.
    pub qps: u64,
    /// The method's completion count.
    pub total: u64,
}
