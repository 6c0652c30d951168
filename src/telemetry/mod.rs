//! Gateway telemetry.
//!
//! Every admission, completion and registry refresh produces a
//! [`GatewayEvent`]. Events flow through `TelemetrySink` implementations,
//! which are plain `tower::Service<GatewayEvent>` values so they compose.
//!
//! The gateway never awaits a sink on the hot path: events are handed to an
//! [`EventEmitter`], whose worker task drives the sink, and are dropped (and
//! counted) when the worker falls behind.

pub mod events;
pub mod sinks;

#[cfg(feature = "json")]
pub use events::event_to_json;
pub use events::{AdmissionEvent, CompletionEvent, ConfigEvent, GatewayEvent};
pub use sinks::{
    ComposedSinkError, EventEmitter, LogSink, MemorySink, MulticastSink, StreamingSink,
    TelemetrySink,
};
