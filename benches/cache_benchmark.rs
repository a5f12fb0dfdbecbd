use bbo_cache_api::cache::TickCache;
use bbo_cache_api::ingest::normalize;
use bbo_cache_api::TickRecord;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;

fn tick(event_time: i64) -> TickRecord {
    TickRecord::new("BTCUSDT", event_time, event_time + 12, dec!(42000.10), dec!(1.5), dec!(42000.20), dec!(0.25))
}

fn benchmark_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.measurement_time(Duration::from_secs(5));

    // In-order appends, the common case
    group.bench_function("append", |b| {
        let cache = TickCache::new(100_000);
        let mut ts = 0;
        b.iter(|| {
            ts += 1;
            cache.insert(black_box(tick(ts)));
        });
    });

    // Late arrivals land in the middle of a full series
    group.bench_function("out_of_order", |b| {
        b.iter_batched(
            || {
                let cache = TickCache::new(10_000);
                for ts in 0..10_000 {
                    cache.insert(tick(ts * 2));
                }
                cache
            },
            |cache| {
                for ts in 0..100 {
                    cache.insert(black_box(tick(ts * 200 + 1)));
                }
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("insert_if_absent_duplicate", |b| {
        let cache = TickCache::new(100_000);
        for ts in 0..50_000 {
            cache.insert(tick(ts));
        }
        b.iter(|| black_box(cache.insert_if_absent(tick(black_box(25_000)))));
    });

    group.finish();
}

fn benchmark_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let cache = TickCache::new(1_000_000);
    for ts in 0..200_000 {
        cache.insert(tick(ts));
    }

    group.bench_function("range_1000", |b| {
        b.iter(|| black_box(cache.query("BTCUSDT", Some(100_000), Some(100_999), None)));
    });

    group.bench_function("latency_stats_10000", |b| {
        b.iter(|| black_box(cache.latency_stats("BTCUSDT", Some(50_000), Some(59_999))));
    });

    group.finish();
}

fn benchmark_normalize(c: &mut Criterion) {
    let native = json!({
        "e": "bookTicker", "s": "BTCUSDT", "E": 1_700_000_000_000i64,
        "b": "42000.10", "B": "1.5", "a": "42000.20", "A": "0.25",
    });

    c.bench_function("normalize_native", |b| {
        b.iter(|| black_box(normalize(black_box(&native), 1_700_000_000_010)));
    });
}

criterion_group!(benches, benchmark_insert, benchmark_query, benchmark_normalize);
criterion_main!(benches);
