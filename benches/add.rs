//! Counting throughput of every map kind.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mdmap::{HashMdMap, HeapPages, MappedPages, MdMap, OffHeapPages, TrieConfig, TrieMdMap};
use rand::{rngs::StdRng, Rng, SeedableRng};

const MD_SIZE: usize = 20;

/// SHA-1 sized random digests with roughly one repeat per four adds.
fn generate_digests(n: usize) -> Vec<[u8; MD_SIZE]> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let distinct: Vec<[u8; MD_SIZE]> = (0..n * 3 / 4).map(|_| rng.gen()).collect();
    (0..n)
        .map(|_| distinct[rng.gen_range(0..distinct.len())])
        .collect()
}

fn config() -> TrieConfig {
    TrieConfig {
        key_size: MD_SIZE,
        value_size: 8,
        addr_size: 5,
        max_list_size: 8,
        page_size: 1 << 22,
    }
}

fn fill(map: &mut dyn MdMap, digests: &[[u8; MD_SIZE]]) {
    for md in digests {
        map.add(md, 1).unwrap();
    }
}

fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");
    let dir = tempfile::tempdir().unwrap();

    for size in [10_000, 100_000, 1_000_000].iter() {
        let digests = generate_digests(*size);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("hash", size), size, |b, _| {
            b.iter(|| {
                let mut map = HashMdMap::new(MD_SIZE);
                fill(&mut map, &digests);
                black_box(map.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("heap", size), size, |b, _| {
            b.iter(|| {
                let mut map = TrieMdMap::open(config(), HeapPages).unwrap();
                fill(&mut map, &digests);
                black_box(map.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("off-heap", size), size, |b, _| {
            b.iter(|| {
                let mut map = TrieMdMap::open(config(), OffHeapPages).unwrap();
                fill(&mut map, &digests);
                black_box(map.len())
            });
        });

        group.bench_with_input(BenchmarkId::new("mapped", size), size, |b, _| {
            b.iter(|| {
                let mut map = TrieMdMap::open(config(), MappedPages::new(dir.path())).unwrap();
                fill(&mut map, &digests);
                black_box(map.len())
            });
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    let digests = generate_digests(100_000);

    let mut hash = HashMdMap::new(MD_SIZE);
    fill(&mut hash, &digests);
    let mut trie = TrieMdMap::open(config(), OffHeapPages).unwrap();
    fill(&mut trie, &digests);

    group.bench_function("hash", |b| {
        b.iter(|| digests.iter().map(|md| hash.get(md).unwrap()).sum::<u64>())
    });
    group.bench_function("off-heap", |b| {
        b.iter(|| digests.iter().map(|md| trie.get(md).unwrap()).sum::<u64>())
    });

    group.finish();
}

criterion_group!(benches, bench_add, bench_get);
criterion_main!(benches);
