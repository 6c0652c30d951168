#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # gatehouse
//!
//! In-process admission control and telemetry for named operations: HTTP
//! routes, RPC methods, anything a host can name by path.
//!
//! ## Features
//!
//! - **Per-method rate limits**: token bucket with burst, or a strict leaky
//!   bucket; `-1` degrades a method to reject-all, `0` leaves it unlimited
//! - **Blocking, bounded and non-blocking admission**
//! - **Response cache** keyed by the caller, with per-method TTL and success code
//! - **Statistics**: whole-second QPS, totals, code histograms and latency
//!   percentiles from a bounded sample window
//! - **Hot reload** of method definitions from a provider, without a pause
//! - **Tower middleware** and structured telemetry events
//!
//! ## Quick Start
//!
//! ```rust
//! use gatehouse::{Call, Gateway, MethodOption, Verdict};
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Gateway::new(vec![
//!         MethodOption::new("catalog", "/catalog").second_limit(100).cache_seconds(5),
//!     ]);
//!
//!     let admission = gateway.admit(Call::new("/catalog").cache_key("page=1")).await;
//!     if admission.verdict() == Verdict::Admit {
//!         // do the real work, then report it
//!         gateway.complete(admission, 200, Some(Bytes::from_static(b"[...]"))).unwrap();
//!     }
//!
//!     let again = gateway.admit(Call::new("/catalog").cache_key("page=1")).await;
//!     assert_eq!(again.verdict(), Verdict::CacheHit);
//!     println!("{:?}", gateway.snapshot());
//! }
//! ```

pub mod adaptive;
pub mod cache;
pub mod clock;
pub mod context;
pub mod error;
pub mod gateway;
pub mod latency;
pub mod layer;
pub mod method;
pub mod prelude;
pub mod provider;
pub mod rate_limit;
pub mod registry;
pub mod sync;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use cache::{CacheEntry, ResponseCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{Admission, Call, Completion, Verdict};
pub use error::{GatewayError, ProviderError};
pub use gateway::{Gateway, GatewayBuilder, MethodSnapshot, Snapshot, UnknownPathPolicy};
pub use latency::{LatencyStats, LatencyWindow};
pub use layer::{AdmissionError, GatewayLayer, GatewayService, Outcome, Routable};
pub use method::{Method, MethodOption, MethodPolicy, RateLimit, Throughput};
pub use provider::{MethodProvider, StaticProvider};
pub use rate_limit::{Decision, RateLimiter, TokenBucket};
pub use registry::{MergeReport, MethodRegistry};
pub use sync::ConfigSync;
