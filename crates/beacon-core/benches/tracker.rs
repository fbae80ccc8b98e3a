//! Presence benchmarks for beacon-core.
//!
//! Uses the in-memory store, so these measure the tracker and index
//! overhead rather than Redis round trips.

use beacon_core::{
    token, CountKind, Index, ManualClock, MemoryStore, PresenceStore, PresenceTracker,
    TrackerConfig, UuidGenerator,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_validate(c: &mut Criterion) {
    let good = "123e4567-e89b-12d3-a456-426614174000";
    let bad = "123e4567";

    let mut group = c.benchmark_group("validate");
    group.bench_function("valid", |b| b.iter(|| token::validate(black_box(good))));
    group.bench_function("invalid", |b| b.iter(|| token::validate(black_box(bad))));
    group.finish();
}

fn bench_heartbeat(c: &mut Criterion) {
    let rt = runtime();
    let store = Arc::new(MemoryStore::new());
    let tracker = PresenceTracker::new(
        store,
        Arc::new(ManualClock::new(1_700_000_000)),
        Arc::new(UuidGenerator),
        TrackerConfig::default(),
    );
    let session = rt.block_on(tracker.create_session()).unwrap();

    c.bench_function("heartbeat_authenticated", |b| {
        b.iter(|| {
            rt.block_on(tracker.heartbeat(black_box(session.as_str()), Some(true)))
                .unwrap()
        })
    });
}

fn bench_count_live(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("count_live");

    for sessions in [1_000u64, 10_000, 100_000] {
        let store = Arc::new(MemoryStore::new());
        let tracker = PresenceTracker::new(
            store.clone(),
            Arc::new(ManualClock::new(1_700_000_000)),
            Arc::new(UuidGenerator),
            TrackerConfig::default(),
        );
        rt.block_on(async {
            for _ in 0..sessions {
                tracker.create_session().await.unwrap();
            }
        });

        group.bench_with_input(BenchmarkId::from_parameter(sessions), &store, |b, store| {
            b.iter(|| {
                rt.block_on(store.count_live(CountKind::Total.index(), black_box(0)))
                    .unwrap()
            })
        });
        assert_eq!(store.indexed(Index::Sessions) as u64, sessions);
    }

    group.finish();
}

criterion_group!(benches, bench_validate, bench_heartbeat, bench_count_live);
criterion_main!(benches);
