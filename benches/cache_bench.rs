//! Benchmarks for response cache lookup.
//!
//! Measures how quickly a GET can be answered from, or found missing in,
//! the cache.

use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box};

use dohrace::cache::{CacheKey, CacheStore, ResponseCache};
use dohrace::upstream::DohResponse;

const TTL: Duration = Duration::from_secs(300);

fn key(i: usize) -> CacheKey {
    CacheKey::new(&Method::GET, &format!("doh.test/dns-query?dns=query{i}"))
}

fn response() -> DohResponse {
    DohResponse {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        body: Bytes::from_static(&[0u8; 64]),
    }
}

fn bench_lookup(c: &mut Criterion) {
    let cache = ResponseCache::new();
    for i in 0..10_000 {
        cache.put(key(i), response(), TTL).unwrap();
    }

    let hit = key(4242);
    let miss = key(10_001);

    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("get", "hit"), |b| {
        b.iter(|| cache.get(black_box(&hit)))
    });

    group.bench_function(BenchmarkId::new("get", "miss"), |b| {
        b.iter(|| cache.get(black_box(&miss)))
    });

    group.bench_function(BenchmarkId::new("put", "overwrite"), |b| {
        b.iter(|| cache.put(black_box(hit.clone()), response(), TTL))
    });

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_lookup(&mut criterion);
    criterion.final_summary();
}
