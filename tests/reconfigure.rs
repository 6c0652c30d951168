#![allow(missing_docs)]

mod common;

use gatehouse::provider::from_fn;
use gatehouse::telemetry::{ConfigEvent, GatewayEvent, MemorySink};
use gatehouse::{Gateway, MethodOption, ProviderError, Verdict};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Provider whose answer the test can change between ticks.
#[derive(Clone)]
struct Table(Arc<Mutex<Result<Vec<MethodOption>, String>>>);

impl Table {
    fn new(options: Vec<MethodOption>) -> Self {
        Self(Arc::new(Mutex::new(Ok(options))))
    }

    fn set(&self, options: Vec<MethodOption>) {
        *self.0.lock().unwrap() = Ok(options);
    }

    fn fail(&self, reason: &str) {
        *self.0.lock().unwrap() = Err(reason.to_string());
    }

    fn provider(&self) -> impl gatehouse::MethodProvider + 'static {
        let table = self.clone();
        from_fn(move || {
            let current = table.0.lock().unwrap().clone();
            async move { current.map_err(ProviderError::failed) }
        })
    }
}

#[tokio::test(start_paused = true)]
async fn lowering_limit_to_zero_stops_blocking_and_keeps_counters() {
    let table = Table::new(vec![MethodOption::new("orders", "/orders").second_limit(100)]);
    let gateway = Gateway::builder()
        .provider(table.provider())
        .refresh_interval(Duration::from_secs(1))
        .build()
        .await;

    for _ in 0..3 {
        let admission = gateway.admit("/orders").await;
        gateway.complete(admission, 200, None).unwrap();
    }
    // limited: the next admissions wait 10ms each
    let start = Instant::now();
    gateway.admit("/orders").await;
    gateway.admit("/orders").await;
    assert!(start.elapsed() >= Duration::from_millis(10));

    table.set(vec![MethodOption::new("orders", "/orders").second_limit(0)]);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let start = Instant::now();
    for _ in 0..500 {
        assert_eq!(gateway.admit("/orders").await.verdict(), Verdict::Admit);
    }
    assert_eq!(start.elapsed(), Duration::ZERO);

    let snap = gateway.snapshot();
    let orders = snap.method("/orders").unwrap();
    assert_eq!(orders.second_limit, 0);
    assert_eq!(orders.total, 3);
}

#[tokio::test(start_paused = true)]
async fn provider_failure_keeps_current_methods() {
    let logs = common::capture_logs();
    let sink = MemorySink::new();
    let table = Table::new(vec![MethodOption::new("a", "/a").second_limit(-1)]);
    let gateway = Gateway::builder()
        .provider(table.provider())
        .refresh_interval(Duration::from_secs(1))
        .telemetry(sink.clone())
        .build()
        .await;

    table.fail("connection refused");
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(gateway.admit("/a").await.verdict(), Verdict::Reject);
    let err = gateway.reload().await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));

    common::settle(|| {
        sink.events()
            .iter()
            .any(|e| matches!(e, GatewayEvent::Config(ConfigEvent::ProviderFailed { .. })))
    })
    .await;

    let logs = logs.contents();
    assert!(logs.contains("gatehouse::provider"), "{logs}");
    assert!(logs.contains("provider failed; keeping current methods"), "{logs}");

    // the next tick proceeds normally
    table.set(vec![MethodOption::new("a", "/a")]);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(gateway.admit("/a").await.verdict(), Verdict::Admit);
}

#[tokio::test(start_paused = true)]
async fn methods_missing_from_the_provider_are_kept() {
    let table = Table::new(vec![
        MethodOption::new("a", "/a").second_limit(-1),
        MethodOption::new("b", "/b"),
    ]);
    let gateway = Gateway::builder()
        .provider(table.provider())
        .refresh_interval(Duration::from_secs(1))
        .build()
        .await;

    table.set(vec![MethodOption::new("b", "/b")]);
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let method = gateway.method("/a").expect("never removed");
    assert_eq!(method.policy().limit.as_raw(), -1);
    assert_eq!(gateway.admit("/a").await.verdict(), Verdict::Reject);
}

#[tokio::test(start_paused = true)]
async fn updates_are_in_place() {
    let table = Table::new(vec![MethodOption::new("a", "/a")]);
    let gateway = Gateway::builder().provider(table.provider()).build().await;
    let before = gateway.method("/a").unwrap();

    let admission = gateway.admit("/a").await;
    gateway.complete(admission, 200, None).unwrap();

    table.set(vec![MethodOption::new("renamed", "/a").cache_seconds(10)]);
    let report = gateway.reload().await.unwrap();
    assert_eq!(report.updated, 1);

    let after = gateway.method("/a").unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    let snap = gateway.snapshot();
    let method = snap.method("/a").unwrap();
    assert_eq!(method.name, "renamed");
    assert_eq!(method.cache_seconds, 10);
    assert_eq!(method.total, 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_entries_are_skipped() {
    let table = Table::new(vec![
        MethodOption::new("ok", "/ok"),
        MethodOption::new("bad", "/bad").second_limit(-3),
        MethodOption::new("nameless", ""),
    ]);
    let gateway = Gateway::builder().provider(table.provider()).build().await;

    let report = gateway.reload().await.unwrap();
    assert_eq!(report.skipped, 2);
    assert!(gateway.method("/ok").is_some());
    assert!(gateway.method("/bad").is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_further_refreshes() {
    let table = Table::new(vec![MethodOption::new("a", "/a")]);
    let gateway = Gateway::builder()
        .provider(table.provider())
        .refresh_interval(Duration::from_secs(1))
        .build()
        .await;

    gateway.shutdown();
    gateway.shutdown();

    table.set(vec![MethodOption::new("a", "/a").second_limit(-1)]);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(gateway.admit("/a").await.verdict(), Verdict::Admit);

    // manual reload still works after the loop is gone
    gateway.reload().await.unwrap();
    assert_eq!(gateway.admit("/a").await.verdict(), Verdict::Reject);
}

#[tokio::test(start_paused = true)]
async fn seed_failure_leaves_static_methods() {
    let table = Table::new(vec![]);
    table.fail("not ready");
    let gateway = Gateway::builder()
        .method(MethodOption::new("health", "/health"))
        .provider(table.provider())
        .build()
        .await;

    assert!(gateway.method("/health").is_some());
    assert_eq!(gateway.snapshot().methods.len(), 1);
}
