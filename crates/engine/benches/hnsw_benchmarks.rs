//! HNSW insert and search benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ember_engine::vector::{HnswConfig, HnswIndex};
use ember_engine::DistanceMetric;

const DIM: usize = 64;

fn deterministic_vector(i: usize) -> Vec<f32> {
    (0..DIM).map(|j| ((i * DIM + j) as f32 / 997.0).sin()).collect()
}

fn build_index(n: usize) -> HnswIndex {
    let index = HnswIndex::new(DIM, DistanceMetric::Euclidean, HnswConfig::default());
    for i in 0..n {
        index
            .insert(&format!("key{i}"), deterministic_vector(i), i as u64)
            .unwrap();
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("hnsw_insert_1k", |b| {
        b.iter(|| {
            let index = HnswIndex::new(DIM, DistanceMetric::Euclidean, HnswConfig::default());
            for i in 0..1_000 {
                index
                    .insert(&format!("key{i}"), deterministic_vector(i), i as u64)
                    .unwrap();
            }
            black_box(index.len())
        })
    });
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search");
    for n in [1_000, 10_000] {
        let index = build_index(n);
        let query = deterministic_vector(n / 2);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(index.search(&query, 10)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_search);
criterion_main!(benches);
