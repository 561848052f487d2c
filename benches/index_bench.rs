//! Benchmarks for the ACER index
//!
//! Run with: cargo bench

use acer_index::index::RangeBitmapAppender;
use acer_index::storage::block::{BlockBuilder, ClusterStream};
use acer_index::storage::*;
use acer_index::{AcerIndex, CompareOp, Constraint, IndexConfig, Pattern};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roaring::RoaringBitmap;
use tempfile::tempdir;

fn schema() -> EventSchema {
    EventSchema::new(
        "bench",
        &[
            ("ticker", "TYPE"),
            ("price", "INT"),
            ("volume", "INT"),
            ("time", "TIMESTAMP"),
        ],
    )
    .unwrap()
}

fn create_test_rows(count: usize, types: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut ts = 0i64;
    (0..count)
        .map(|_| {
            ts += rng.gen_range(1..=10);
            format!(
                "T{},{},{},{}",
                rng.gen_range(0..types),
                rng.gen_range(0..1000),
                rng.gen_range(0..1000),
                ts
            )
        })
        .collect()
}

fn bench_codecs(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let mut rng = StdRng::seed_from_u64(1);
    let mut ts = 0i64;
    let values: Vec<i64> = (0..10_000)
        .map(|_| {
            ts += rng.gen_range(0..100);
            ts
        })
        .collect();

    group.throughput(Throughput::Elements(values.len() as u64));
    for kind in [
        CodecKind::Delta,
        CodecKind::VarInt,
        CodecKind::Simple8b,
        CodecKind::DeltaOfDelta,
    ] {
        let codec = kind.codec();

        group.bench_function(format!("encode_{}", kind), |b| {
            b.iter(|| {
                let mut out = Vec::new();
                codec.encode(black_box(&values), &mut out).unwrap();
                out
            })
        });

        let mut encoded = Vec::new();
        codec.encode(&values, &mut encoded).unwrap();

        group.bench_function(format!("decode_{}", kind), |b| {
            b.iter(|| codec.decode(black_box(&encoded), values.len()).unwrap())
        });
    }

    group.finish();
}

fn bench_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("block");
    let mut rng = StdRng::seed_from_u64(2);

    for rows in [1_000u32, 10_000] {
        let mut appenders = vec![RangeBitmapAppender::new(); 2];
        let mut stream = ClusterStream::with_capacity(rows as usize);
        for i in 0..rows {
            appenders[0].add(rng.gen_range(0..1000));
            appenders[1].add(rng.gen_range(0..100_000));
            stream.push(i as i64 * 3, Rid::new(i / 100, (i % 100) as u16).to_key());
        }
        let clusters = vec![stream];
        let deletions = RoaringBitmap::new();

        group.throughput(Throughput::Elements(rows as u64));
        for layout in [LayoutKind::PerCluster, LayoutKind::WholeBlock] {
            let builder = BlockBuilder::new(layout, CodecKind::Simple8b);
            group.bench_function(format!("build_{}_{}", layout, rows), |b| {
                b.iter(|| {
                    builder
                        .build(black_box(&appenders), &deletions, &clusters)
                        .unwrap()
                })
            });
        }
    }

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    let rows = create_test_rows(50_000, 20);

    group.throughput(Throughput::Elements(rows.len() as u64));
    group.sample_size(10);
    group.bench_function("insert_50000", |b| {
        b.iter_custom(|iters| {
            let mut total = std::time::Duration::ZERO;
            for _ in 0..iters {
                let dir = tempdir().unwrap();
                let config = IndexConfig::new(dir.path()).capacity(8192).sample_seed(1);
                let mut index = AcerIndex::create(config, schema(), &["price", "volume"]).unwrap();

                let start = std::time::Instant::now();
                for row in &rows {
                    index.insert(black_box(row), false).unwrap();
                }
                total += start.elapsed();
            }
            total
        });
    });

    let dir = tempdir().unwrap();
    let config = IndexConfig::new(dir.path()).capacity(8192).sample_seed(1);
    let mut index = AcerIndex::create(config, schema(), &["price", "volume"]).unwrap();
    for row in &rows {
        index.insert(row, false).unwrap();
    }

    let pattern = Pattern::sequence(50)
        .variable("a", "T0")
        .variable("b", "T1")
        .constraint(
            Constraint::new("a", "price")
                .compare(CompareOp::Ge, 100.0)
                .compare(CompareOp::Le, 300.0),
        )
        .constraint(Constraint::new("b", "volume").compare(CompareOp::Gt, 900.0));

    group.throughput(Throughput::Elements(1));
    group.bench_function("two_phase_query", |b| {
        b.iter(|| index.query(black_box(&pattern)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_codecs, bench_block, bench_engine);
criterion_main!(benches);
