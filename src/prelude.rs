//! Convenient re-exports for common gatehouse types.
pub use crate::{
    context::{Admission, Call, Completion, Verdict},
    gateway::{Gateway, GatewayBuilder, Snapshot, UnknownPathPolicy},
    layer::{AdmissionError, GatewayLayer, Outcome, Routable},
    method::MethodOption,
    provider::{from_fn, MethodProvider, StaticProvider},
    telemetry::{GatewayEvent, LogSink, MemorySink},
    GatewayError, ProviderError,
};
