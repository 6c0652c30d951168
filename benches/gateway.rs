use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gatehouse::{Call, Gateway, MethodOption};

fn gateway() -> Gateway {
    Gateway::new(vec![
        MethodOption::new("open", "/open"),
        MethodOption::new("cached", "/cached").cache_seconds(60),
        // effectively never throttles inside one sample
        MethodOption::new("limited", "/limited").second_limit(1_000_000_000),
    ])
}

fn admit_complete(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let gw = gateway();

    c.bench_function("admit_complete_unlimited", |b| {
        b.to_async(&rt).iter(|| async {
            let admission = gw.admit(black_box("/open")).await;
            let _ = black_box(gw.complete(admission, 200, None));
        });
    });

    c.bench_function("admit_complete_cache_hit", |b| {
        let seed = gw.try_admit(Call::new("/cached").cache_key("k"));
        let _ = gw.complete(seed, 200, Some(Bytes::from_static(b"payload")));
        b.to_async(&rt).iter(|| async {
            let admission = gw.admit(Call::new("/cached").cache_key(black_box("k"))).await;
            let _ = black_box(gw.complete(admission, 200, None));
        });
    });
}

fn try_admit_limited(c: &mut Criterion) {
    let gw = gateway();
    c.bench_function("try_admit_limited", |b| {
        b.iter(|| {
            let admission = gw.try_admit(black_box("/limited"));
            let _ = black_box(gw.complete(admission, 200, None));
        });
    });
}

fn snapshot(c: &mut Criterion) {
    let gw = gateway();
    for _ in 0..1_000 {
        let admission = gw.try_admit("/open");
        let _ = gw.complete(admission, 200, None);
    }
    c.bench_function("snapshot", |b| b.iter(|| black_box(gw.snapshot())));
}

criterion_group!(benches, admit_complete, try_admit_limited, snapshot);
criterion_main!(benches);
