//! Tower middleware running the admit/complete protocol around a service.
//!
//! Requests name their call through [`Routable`]; responses report their code
//! and cacheable payload through [`Outcome`]. A cache hit is answered without
//! calling the inner service, a rejection or busy verdict becomes an
//! [`AdmissionError`], and every request is completed exactly once.
//!
//! ```rust
//! use bytes::Bytes;
//! use gatehouse::layer::{GatewayLayer, Outcome, Routable};
//! use gatehouse::{Call, Gateway, MethodOption};
//! use tower::{service_fn, Layer, ServiceExt};
//!
//! struct Req(&'static str);
//! impl Routable for Req {
//!     fn route(&self) -> Call {
//!         Call::new(self.0)
//!     }
//! }
//!
//! struct Resp(u16);
//! impl Outcome for Resp {
//!     fn code(&self) -> i32 {
//!         i32::from(self.0)
//!     }
//!     fn from_cached(_data: Bytes) -> Self {
//!         Resp(200)
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let gateway = Gateway::new(vec![MethodOption::new("ping", "/ping")]);
//! let svc = GatewayLayer::new(gateway.clone())
//!     .layer(service_fn(|_req: Req| async { Ok::<_, std::io::Error>(Resp(204)) }));
//!
//! let resp = svc.oneshot(Req("/ping")).await.unwrap();
//! assert_eq!(resp.0, 204);
//! assert_eq!(gateway.snapshot().total, 1);
//! # }
//! ```

use crate::context::{Call, Verdict};
use crate::gateway::Gateway;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Code recorded for calls refused by the gateway.
pub const DEFAULT_BUSY_CODE: i32 = 408;
/// Code recorded when the inner service fails.
pub const DEFAULT_FAILED_CODE: i32 = 500;

/// A request that knows which call it is.
pub trait Routable {
    /// Path, and optionally cache key and caller identity, of this request.
    fn route(&self) -> Call;
}

/// A response the gateway can record and cache.
pub trait Outcome: Sized {
    /// Result code for the code histogram and the success-code check.
    fn code(&self) -> i32;

    /// Bytes to cache when the method caches this code.
    fn payload(&self) -> Option<Bytes> {
        None
    }

    /// Rebuild a response from a cached payload.
    fn from_cached(data: Bytes) -> Self;
}

/// Errors produced by [`GatewayService`].
#[derive(Debug)]
pub enum AdmissionError<E> {
    /// The method is degraded, or the path is unknown under a rejecting policy.
    Rejected { path: String },
    /// The limiter did not grant in time.
    Busy { path: String, timed_out: bool },
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { path } => write!(f, "admission to '{}' rejected", path),
            Self::Busy { path, timed_out: true } => {
                write!(f, "'{}' is busy: admission timed out", path)
            }
            Self::Busy { path, timed_out: false } => write!(f, "'{}' is busy", path),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> AdmissionError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    timeout: Option<Duration>,
    busy_code: i32,
    failed_code: i32,
}

/// Layer wrapping services with gateway admission.
#[derive(Debug, Clone)]
pub struct GatewayLayer {
    gateway: Gateway,
    settings: Settings,
}

impl GatewayLayer {
    /// Blocking admission, 408 for refused calls, 500 for inner failures.
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            settings: Settings {
                timeout: None,
                busy_code: DEFAULT_BUSY_CODE,
                failed_code: DEFAULT_FAILED_CODE,
            },
        }
    }

    /// Use bounded admission with this deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = Some(timeout);
        self
    }

    /// Code recorded for rejected and busy calls.
    pub fn busy_code(mut self, code: i32) -> Self {
        self.settings.busy_code = code;
        self
    }

    /// Code recorded when the inner service errors.
    pub fn failed_code(mut self, code: i32) -> Self {
        self.settings.failed_code = code;
        self
    }
}

impl<S> Layer<S> for GatewayLayer {
    type Service = GatewayService<S>;

    fn layer(&self, service: S) -> Self::Service {
        GatewayService { inner: service, gateway: self.gateway.clone(), settings: self.settings }
    }
}

/// Middleware service produced by [`GatewayLayer`].
#[derive(Debug, Clone)]
pub struct GatewayService<S> {
    inner: S,
    gateway: Gateway,
    settings: Settings,
}

impl<S, Req> Service<Req> for GatewayService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Outcome + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    Req: Routable + Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let gateway = self.gateway.clone();
        let settings = self.settings;
        // the instance polled ready goes with this call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let call = req.route();
            let admission = match settings.timeout {
                Some(timeout) => gateway.admit_with_timeout(call, timeout).await,
                None => gateway.admit(call).await,
            };

            // completion only fails for unknown paths, which still get served
            match admission.verdict() {
                Verdict::CacheHit => {
                    let data = admission.cached().cloned().unwrap_or_default();
                    let response = S::Response::from_cached(data);
                    let _ = gateway.complete(admission, response.code(), None);
                    Ok(response)
                }
                Verdict::Reject => {
                    let path = admission.path().to_string();
                    let _ = gateway.complete(admission, settings.busy_code, None);
                    Err(AdmissionError::Rejected { path })
                }
                Verdict::Busy => {
                    let path = admission.path().to_string();
                    let timed_out = admission.timed_out();
                    let _ = gateway.complete(admission, settings.busy_code, None);
                    Err(AdmissionError::Busy { path, timed_out })
                }
                Verdict::Admit => match inner.call(req).await {
                    Ok(response) => {
                        let _ = gateway.complete(admission, response.code(), response.payload());
                        Ok(response)
                    }
                    Err(err) => {
                        let _ = gateway.complete(admission, settings.failed_code, None);
                        Err(AdmissionError::Inner(err))
                    }
                },
            }
        })
    }
}
