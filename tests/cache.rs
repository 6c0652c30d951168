#![allow(missing_docs)]

use bytes::Bytes;
use gatehouse::{Call, Gateway, ManualClock, MethodOption, Verdict};
use std::time::Duration;

async fn catalog() -> (Gateway, ManualClock) {
    let clock = ManualClock::default();
    let gateway = Gateway::builder()
        .method(MethodOption::new("catalog", "catalog").cache_seconds(5).success_code(200))
        .clock(clock.clone())
        .build()
        .await;
    (gateway, clock)
}

#[tokio::test]
async fn catalog_round_trip_expires_after_ttl() {
    let (gateway, clock) = catalog().await;

    let admission = gateway.admit(Call::new("catalog").cache_key("catalog:all")).await;
    assert_eq!(admission.verdict(), Verdict::Admit);
    gateway.complete(admission, 200, Some(Bytes::from_static(b"v1"))).unwrap();

    let hit = gateway.admit(Call::new("catalog").cache_key("catalog:all")).await;
    assert_eq!(hit.verdict(), Verdict::CacheHit);
    assert_eq!(hit.cached(), Some(&Bytes::from_static(b"v1")));
    gateway.complete(hit, 200, None).unwrap();

    clock.advance(Duration::from_secs(6));
    let miss = gateway.admit(Call::new("catalog").cache_key("catalog:all")).await;
    assert_eq!(miss.verdict(), Verdict::Admit);
    assert!(miss.cached().is_none());
}

#[tokio::test]
async fn entry_is_served_until_its_last_second() {
    let (gateway, clock) = catalog().await;
    let admission = gateway.admit(Call::new("catalog").cache_key("k")).await;
    gateway.complete(admission, 200, Some(Bytes::from_static(b"v1"))).unwrap();

    clock.advance(Duration::from_millis(4_999));
    assert_eq!(gateway.try_admit(Call::new("catalog").cache_key("k")).verdict(), Verdict::CacheHit);

    clock.advance(Duration::from_millis(1));
    assert_eq!(gateway.try_admit(Call::new("catalog").cache_key("k")).verdict(), Verdict::Admit);
}

#[tokio::test]
async fn calls_without_a_cache_key_are_never_cached() {
    let (gateway, _clock) = catalog().await;
    let admission = gateway.admit("catalog").await;
    gateway.complete(admission, 200, Some(Bytes::from_static(b"v1"))).unwrap();
    assert!(gateway.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cache_hits_do_not_consume_limiter_capacity() {
    let gateway = Gateway::new(vec![MethodOption::new("item", "/item")
        .second_limit(1)
        .bucket_size(1)
        .cache_seconds(30)]);

    let admission = gateway.try_admit(Call::new("/item").cache_key("item:1"));
    assert_eq!(admission.verdict(), Verdict::Admit);
    gateway.complete(admission, 200, Some(Bytes::from_static(b"{}"))).unwrap();

    for _ in 0..10 {
        let hit = gateway.try_admit(Call::new("/item").cache_key("item:1"));
        assert_eq!(hit.verdict(), Verdict::CacheHit);
    }
    // a different key still meets the exhausted limiter
    assert_eq!(gateway.try_admit(Call::new("/item").cache_key("item:2")).verdict(), Verdict::Busy);
}

#[tokio::test]
async fn methods_without_cache_ignore_existing_entries() {
    let clock = ManualClock::default();
    let gateway = Gateway::builder()
        .method(MethodOption::new("cached", "/cached").cache_seconds(60))
        .method(MethodOption::new("plain", "/plain"))
        .clock(clock.clone())
        .build()
        .await;

    let admission = gateway.admit(Call::new("/cached").cache_key("shared")).await;
    gateway.complete(admission, 200, Some(Bytes::from_static(b"x"))).unwrap();

    let plain = gateway.admit(Call::new("/plain").cache_key("shared")).await;
    assert_eq!(plain.verdict(), Verdict::Admit);
}

#[tokio::test]
async fn reload_sweeps_expired_entries() {
    let (gateway, clock) = catalog().await;
    let admission = gateway.admit(Call::new("catalog").cache_key("k")).await;
    gateway.complete(admission, 200, Some(Bytes::from_static(b"v1"))).unwrap();
    assert_eq!(gateway.cache().len(), 1);

    clock.advance(Duration::from_secs(10));
    let report = gateway.reload().await.unwrap();
    assert!(report.is_noop());
    assert!(gateway.cache().is_empty());
}
