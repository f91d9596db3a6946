use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use shardcache_core::ring::HashRing;

fn bench_lookup(c: &mut Criterion) {
    let nodes: Vec<String> = (0..64).map(|i| format!("node-{i}")).collect();
    let ring = HashRing::with_equal_weights(nodes);
    let mut group = c.benchmark_group("hash_ring_lookup");
    for size in [1usize, 100, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let keys: Vec<String> = (0..size).map(|i| format!("key-{i}")).collect();
            b.iter(|| {
                for key in &keys {
                    std::hint::black_box(ring.get_node(key.as_bytes()));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lookup);
criterion_main!(benches);
