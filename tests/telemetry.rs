#![allow(missing_docs)]

mod common;

use bytes::Bytes;
use gatehouse::telemetry::{
    AdmissionEvent, CompletionEvent, ConfigEvent, GatewayEvent, LogSink, MemorySink,
    MulticastSink, StreamingSink,
};
use gatehouse::{Call, Gateway, MethodOption, StaticProvider, Verdict};
use std::time::Duration;

#[tokio::test]
async fn admission_and_completion_events_follow_the_call() {
    let sink = MemorySink::new();
    let gateway = Gateway::builder()
        .method(MethodOption::new("catalog", "/catalog").cache_seconds(30))
        .telemetry(sink.clone())
        .build()
        .await;

    let admission = gateway.admit(Call::new("/catalog").cache_key("k")).await;
    gateway.complete(admission, 200, Some(Bytes::from_static(b"x"))).unwrap();
    let hit = gateway.admit(Call::new("/catalog").cache_key("k")).await;
    gateway.complete(hit, 200, None).unwrap();

    common::settle(|| sink.len() == 4).await;
    let events = sink.events();
    assert_eq!(
        events[0],
        GatewayEvent::Admission(AdmissionEvent {
            path: "/catalog".into(),
            verdict: Verdict::Admit,
            timed_out: false,
            unknown_path: false,
        })
    );
    assert!(matches!(&events[1], GatewayEvent::Completion(CompletionEvent { cached: true, .. })));
    assert!(matches!(&events[2], GatewayEvent::Admission(a) if a.verdict == Verdict::CacheHit));
    assert!(matches!(&events[3], GatewayEvent::Completion(CompletionEvent { cached: false, .. })));
}

#[tokio::test]
async fn reload_emits_config_event() {
    let stream = StreamingSink::new(16);
    let mut rx = stream.subscribe();
    let gateway = Gateway::builder()
        .provider(StaticProvider::new(vec![
            MethodOption::new("a", "/a"),
            MethodOption::new("bad", "/bad").second_limit(-9),
        ]))
        .telemetry(stream.clone())
        .build()
        .await;

    let seeded = rx.recv().await.unwrap();
    assert_eq!(
        seeded,
        GatewayEvent::Config(ConfigEvent::Reloaded { added: 1, updated: 0, skipped: 1 })
    );

    gateway.reload().await.unwrap();
    let again = rx.recv().await.unwrap();
    assert_eq!(
        again,
        GatewayEvent::Config(ConfigEvent::Reloaded { added: 0, updated: 0, skipped: 1 })
    );
}

#[tokio::test(start_paused = true)]
async fn busy_timeouts_are_flagged_in_events_and_logs() {
    let logs = common::capture_logs();
    let sink = MemorySink::new();
    let gateway = Gateway::builder()
        .method(MethodOption::new("pay", "/pay").second_limit(1).bucket_size(1))
        .telemetry(MulticastSink::new(sink.clone(), LogSink))
        .build()
        .await;

    gateway.admit("/pay").await;
    gateway.admit_with_timeout("/pay", Duration::from_millis(10)).await;

    common::settle(|| sink.len() == 2).await;
    assert!(matches!(
        &sink.events()[1],
        GatewayEvent::Admission(AdmissionEvent { verdict: Verdict::Busy, timed_out: true, .. })
    ));

    let logs = logs.contents();
    assert!(logs.contains("admission timed out"), "{logs}");
    assert!(logs.contains("gatehouse::telemetry"), "{logs}");
}

#[tokio::test]
async fn full_queue_drops_instead_of_blocking() {
    let sink = MemorySink::new();
    let gateway = Gateway::builder()
        .method(MethodOption::new("a", "/a"))
        .telemetry(sink)
        .telemetry_capacity(1)
        .build()
        .await;

    // the worker cannot run until this task yields
    for _ in 0..5 {
        gateway.try_admit("/a");
    }
    assert_eq!(gateway.dropped_events(), 4);
}

#[tokio::test]
async fn memory_sink_keeps_the_newest_events() {
    let sink = MemorySink::with_capacity(3);
    let paths: Vec<String> = (0..5).map(|i| format!("/m{i}")).collect();
    let gateway = Gateway::builder()
        .methods(paths.iter().map(|p| MethodOption::new(p.clone(), p.clone())))
        .telemetry(sink.clone())
        .build()
        .await;

    for path in &paths {
        gateway.try_admit(path.as_str());
    }

    common::settle(|| sink.evicted() == 2).await;
    let kept: Vec<String> = sink
        .events()
        .into_iter()
        .map(|event| match event {
            GatewayEvent::Admission(a) => a.path,
            other => panic!("unexpected {other}"),
        })
        .collect();
    assert_eq!(kept, ["/m2", "/m3", "/m4"]);
    assert_eq!(sink.len(), sink.capacity());
}
