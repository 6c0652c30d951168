use super::events::GatewayEvent;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tower::Service;

type SinkFuture<E> = BoxFuture<'static, Result<(), E>>;

/// A telemetry sink that consumes gateway events.
pub trait TelemetrySink:
    tower::Service<GatewayEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Logs every event through `tracing` at info level.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GatewayEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GatewayEvent) -> Self::Future {
        tracing::info!(target: "gatehouse::telemetry", event = %event, "gateway_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the most recent events in memory; the oldest is evicted when full.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<GatewayEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Sink holding up to `capacity` events (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Copy of the stored events, oldest first.
    pub fn events(&self) -> Vec<GatewayEvent> {
        self.guard().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped to make room.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<GatewayEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GatewayEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GatewayEvent) -> Self::Future {
        let mut guard = self.guard();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

/// Broadcasts events to any number of subscribers.
///
/// Sending with no live subscriber counts as a drop.
#[derive(Clone, Debug)]
pub struct StreamingSink {
    sender: Arc<tokio::sync::broadcast::Sender<GatewayEvent>>,
    dropped: Arc<AtomicU64>,
}

impl StreamingSink {
    /// Sink whose subscribers lag after `capacity` unread events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity.max(1));
        Self { sender: Arc::new(sender), dropped: Arc::new(AtomicU64::new(0)) }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Service<GatewayEvent> for StreamingSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GatewayEvent) -> Self::Future {
        if self.sender.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for StreamingSink {
    type SinkError = Infallible;
}

/// Error from one branch of a composed sink.
#[derive(Debug)]
pub struct ComposedSinkError(Box<dyn std::error::Error + Send + Sync>);

impl fmt::Display for ComposedSinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "telemetry sink error: {}", self.0)
    }
}

impl std::error::Error for ComposedSinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.0)
    }
}

/// Delivers every event to two sinks.
#[derive(Clone, Debug)]
pub struct MulticastSink<A, B> {
    sink_a: A,
    sink_b: B,
}

impl<A, B> MulticastSink<A, B> {
    pub fn new(sink_a: A, sink_b: B) -> Self {
        Self { sink_a, sink_b }
    }
}

impl<A, B> Service<GatewayEvent> for MulticastSink<A, B>
where
    A: tower::Service<GatewayEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<GatewayEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type Response = ();
    type Error = ComposedSinkError;
    type Future = SinkFuture<Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GatewayEvent) -> Self::Future {
        let mut sink_a = self.sink_a.clone();
        let mut sink_b = self.sink_b.clone();
        let event_clone = event.clone();

        Box::pin(async move {
            let (res_a, res_b) = tokio::join!(sink_a.call(event), sink_b.call(event_clone));
            res_a.map_err(|e| ComposedSinkError(Box::new(e)))?;
            res_b.map_err(|e| ComposedSinkError(Box::new(e)))?;
            Ok(())
        })
    }
}

impl<A, B> TelemetrySink for MulticastSink<A, B>
where
    A: tower::Service<GatewayEvent, Response = ()> + Clone + Send + 'static,
    A::Error: std::error::Error + Send + Sync + 'static,
    A::Future: Send + 'static,
    B: tower::Service<GatewayEvent, Response = ()> + Clone + Send + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
    B::Future: Send + 'static,
{
    type SinkError = ComposedSinkError;
}

/// Hands events to a worker task over a bounded channel.
///
/// [`emit`](Self::emit) never blocks or awaits; when the channel is full the
/// event is dropped and counted. The worker exits once every emitter clone is
/// gone.
#[derive(Clone)]
pub struct EventEmitter {
    tx: tokio::sync::mpsc::Sender<GatewayEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Spawn the worker that drives `sink`. Must run inside a tokio runtime.
    pub fn spawn<S>(sink: S, capacity: usize) -> Self
    where
        S: tower::Service<GatewayEvent, Response = ()> + Send + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let (tx, mut rx) = tokio::sync::mpsc::channel(capacity.max(1));
        let mut sink = sink;

        tokio::spawn(async move {
            use tower::ServiceExt;
            while let Some(event) = rx.recv().await {
                match sink.ready().await {
                    Ok(ready) => {
                        if let Err(err) = ready.call(event).await {
                            tracing::debug!(
                                target: "gatehouse::telemetry",
                                error = %err,
                                "sink rejected event"
                            );
                        }
                    }
                    Err(err) => {
                        tracing::debug!(
                            target: "gatehouse::telemetry",
                            error = %err,
                            "sink unavailable"
                        );
                    }
                }
            }
        });

        Self { tx, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// Queue `event` for delivery.
    pub fn emit(&self, event: GatewayEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events lost to a full or closed channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").field("dropped", &self.dropped()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Verdict;
    use crate::telemetry::events::{AdmissionEvent, ConfigEvent};

    fn admitted(path: &str) -> GatewayEvent {
        GatewayEvent::Admission(AdmissionEvent {
            path: path.into(),
            verdict: Verdict::Admit,
            timed_out: false,
            unknown_path: false,
        })
    }

    #[tokio::test]
    async fn log_sink_accepts_events() {
        LogSink.call(admitted("/a")).await.unwrap();
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let mut sink = MemorySink::with_capacity(2);
        assert!(sink.is_empty());

        sink.call(admitted("/1")).await.unwrap();
        sink.call(admitted("/2")).await.unwrap();
        sink.call(admitted("/3")).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events(), vec![admitted("/2"), admitted("/3")]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn streaming_sink_counts_drops_without_subscribers() {
        let sink = StreamingSink::new(4);
        let mut tx = sink.clone();
        tx.call(admitted("/a")).await.unwrap();
        assert_eq!(sink.dropped_count(), 1);

        let mut rx = sink.subscribe();
        tx.call(admitted("/b")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), admitted("/b"));
    }

    #[tokio::test]
    async fn multicast_reaches_both_sinks() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let mut both = MulticastSink::new(a.clone(), b.clone());
        let event = GatewayEvent::Config(ConfigEvent::ProviderFailed { reason: "x".into() });
        both.call(event.clone()).await.unwrap();
        assert_eq!(a.events(), vec![event.clone()]);
        assert_eq!(b.events(), vec![event]);
    }

    #[tokio::test]
    async fn emitter_delivers_in_order() {
        let sink = MemorySink::new();
        let emitter = EventEmitter::spawn(sink.clone(), 16);
        emitter.emit(admitted("/1"));
        emitter.emit(admitted("/2"));

        for _ in 0..100 {
            if sink.len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.events(), vec![admitted("/1"), admitted("/2")]);
        assert_eq!(emitter.dropped(), 0);
    }

    #[tokio::test]
    async fn emitter_drops_when_full() {
        let sink = MemorySink::new();
        let emitter = EventEmitter::spawn(sink, 1);
        // current-thread runtime: the worker cannot drain until we yield
        for i in 0..5 {
            emitter.emit(admitted(&format!("/{i}")));
        }
        assert_eq!(emitter.dropped(), 4);
    }
}
