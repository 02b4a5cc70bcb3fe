use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use tiercache_core::cache::shared::{HashRing, DEFAULT_REPLICAS};
use tiercache_core::codec::{decode_value, encode_value};
use tiercache_core::LocalCache;

fn local_cache_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_cache");
    let ttl = Duration::from_secs(60);

    group.bench_function("get_hit", |b| {
        let cache = LocalCache::new(10_000, 64 * 1024 * 1024);
        for i in 0..1000 {
            cache.set(&format!("records:r{}", i), Bytes::from_static(b"payload"), ttl);
        }
        let mut i = 0usize;

        b.iter(|| {
            i = (i + 1) % 1000;
            black_box(cache.get(&format!("records:r{}", i)))
        })
    });

    group.bench_function("set_with_eviction", |b| {
        let cache = LocalCache::new(1000, 64 * 1024 * 1024);
        let mut i = 0usize;

        b.iter(|| {
            i += 1;
            cache.set(&format!("records:r{}", i), Bytes::from_static(b"payload"), ttl);
        })
    });

    group.finish();
}

fn ring_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_ring");
    let nodes = (1..=8).map(|i| format!("server{}", i)).collect();
    let ring = HashRing::new(nodes, DEFAULT_REPLICAS);

    group.bench_function("locate", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i += 1;
            black_box(ring.locate(&format!("ca:records:r{}", i)))
        })
    });

    group.finish();
}

fn codec_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let value: Vec<(String, i64)> = (0..32).map(|i| (format!("r{}", i), i)).collect();
    let raw = encode_value(&value).unwrap();

    group.bench_function("encode", |b| b.iter(|| black_box(encode_value(&value).unwrap())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(decode_value::<Vec<(String, i64)>>(&raw).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, local_cache_benchmarks, ring_benchmarks, codec_benchmarks);
criterion_main!(benches);
