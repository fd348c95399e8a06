//! Benchmarks for stratakv storage operations

use criterion::{criterion_group, criterion_main, Criterion};
use stratakv::{Adder, I64Codec, Store};
use tempfile::TempDir;

/// Honors RUST_LOG for ad-hoc inspection of compaction decisions
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn write_benchmarks(c: &mut Criterion) {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = Store::open_path(tmp.path(), I64Codec, Adder).unwrap();

    let mut key = 0i64;
    c.bench_function("write_sequential", |b| {
        b.iter(|| {
            store.write(key, Some(key)).unwrap();
            key += 1;
        })
    });

    let mut batch_base = 0i64;
    c.bench_function("write_many_1000", |b| {
        b.iter(|| {
            let base = batch_base;
            store
                .write_many((base..base + 1000).map(|k| (k, Some(k))))
                .unwrap();
            batch_base += 1000;
        })
    });
}

fn read_benchmarks(c: &mut Criterion) {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let store = Store::open_path(tmp.path(), I64Codec, Adder).unwrap();

    store
        .write_many((0..10_000).map(|k| (k, Some(k))))
        .unwrap();
    store.optimize_for_reading().unwrap();

    let mut state = 1u64;
    c.bench_function("read_random", |b| {
        b.iter(|| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let key = (state % 10_000) as i64;
            assert_eq!(store.read(key).unwrap(), Some(key));
        })
    });

    let keys: Vec<i64> = (0..256).map(|i| i * 39).collect();
    c.bench_function("read_keys_ordered_256", |b| {
        b.iter(|| {
            let found = store.read_keys(keys.iter().copied()).unwrap();
            assert_eq!(found.len(), 256);
        })
    });
}

criterion_group!(benches, write_benchmarks, read_benchmarks);
criterion_main!(benches);
