//! Benchmarks for the hierarchical index and reordering buffers
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use tracegrid::index::{HierarchicalIndex, StdTuple, MAX_INDEX_LEVELS};
use tracegrid::reorder::EventReorderingBuffer;
use tracegrid::storage::{Event, EventKind, PageLayout, PagedFile};

fn build_index(count: u64) -> HierarchicalIndex<StdTuple> {
    let file = Arc::new(PagedFile::new(PageLayout::default()));
    let mut index = HierarchicalIndex::new("bench", file, MAX_INDEX_LEVELS).unwrap();
    for pointer in 0..count {
        index
            .add(StdTuple {
                key: pointer * 10,
                pointer,
            })
            .unwrap();
    }
    index
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_append");

    for size in [1_000u64, 100_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_function(format!("append_{}", size), |b| {
            b.iter(|| build_index(black_box(size)))
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let index = build_index(1_000_000);
    let mut group = c.benchmark_group("index_lookup");

    group.bench_function("tuple_at_exact", |b| {
        let mut key = 0u64;
        b.iter(|| {
            key = (key + 7_919_993) % 10_000_000;
            index.tuple_at(black_box(key - key % 10), true).unwrap()
        })
    });

    group.bench_function("iterate_1000_from_middle", |b| {
        b.iter(|| {
            let mut iter = index.tuple_iterator(black_box(5_000_000)).unwrap();
            for _ in 0..1000 {
                black_box(iter.next().unwrap());
            }
        })
    });

    group.finish();
}

fn bench_fast_count(c: &mut Criterion) {
    let index = build_index(1_000_000);
    let mut group = c.benchmark_group("fast_count");

    for slots in [10usize, 1000] {
        group.bench_function(format!("slots_{}", slots), |b| {
            b.iter(|| {
                index
                    .fast_count_tuples(black_box(0), black_box(10_000_000), slots)
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_reordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("reordering");
    let count = 100_000u64;
    group.throughput(Throughput::Elements(count));

    // 8 producer threads with interleaved, per-thread monotonic timestamps
    let events: Vec<Event> = (0..count)
        .map(|i| {
            let thread = (i % 8) as u32;
            let timestamp = i * 10 + (7 - i % 8) * 3;
            Event::new(timestamp, 1, thread, EventKind::LocalWrite { variable: 1, value: None })
        })
        .collect();

    group.bench_function("push_pop_8_threads", |b| {
        b.iter(|| {
            let mut buffer = EventReorderingBuffer::new(10_000, 10_000);
            let mut drained = 0usize;
            for event in events.iter().cloned() {
                while buffer.is_full() {
                    buffer.pop();
                    drained += 1;
                }
                let _ = buffer.push(event);
            }
            while buffer.pop().is_some() {
                drained += 1;
            }
            black_box(drained)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_append,
    bench_lookup,
    bench_fast_count,
    bench_reordering
);
criterion_main!(benches);
