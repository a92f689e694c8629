//! Benchmarks for the statuslog store
//!
//! Run with: cargo bench

use chrono::{DateTime, Duration, FixedOffset};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use statuslog::index::{point_search, Indexer, Pattern};
use statuslog::storage::*;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::tempdir;
use url::Url;

fn at(secs: i64) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339("2021-01-02T13:00:00Z").unwrap() + Duration::seconds(secs)
}

fn create_test_records(count: usize) -> Vec<Record> {
    let target = Url::parse("https://example.com/health").unwrap();
    (0..count)
        .map(|i| {
            Record::new(at(i as i64), Status::Healthy, target.clone())
                .latency(std::time::Duration::from_micros(1234))
                .message(format!("check {i}\tok"))
        })
        .collect()
}

fn create_test_log(count: usize) -> (Vec<u8>, Vec<u64>) {
    let mut data = Vec::new();
    let mut offsets = Vec::new();
    for record in create_test_records(count) {
        offsets.push(data.len() as u64);
        data.extend_from_slice(record.to_string().as_bytes());
        data.push(b'\n');
    }
    (data, offsets)
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let records = create_test_records(1000);
    let lines: Vec<String> = records.iter().map(|r| r.to_string()).collect();

    group.throughput(Throughput::Elements(records.len() as u64));

    group.bench_function("format_1000", |b| {
        b.iter(|| {
            for record in &records {
                black_box(record.to_string());
            }
        })
    });

    group.bench_function("parse_1000", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(line.parse::<Record>().unwrap());
            }
        })
    });

    group.finish();
}

fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("index");

    for size in [10_000u64, 100_000, 1_000_000] {
        let mut indexer = Indexer::default();
        for i in 0..size {
            indexer.append_entry(i * 100, i * 100 + 100, &at(i as i64)).unwrap();
        }
        let (since, until) = (at(size as i64 / 2), at(size as i64 / 2 + 3600));

        group.bench_function(format!("search_{size}"), |b| {
            b.iter(|| black_box(indexer.search(black_box(&since), black_box(&until))))
        });
    }

    group.bench_function("append_10000", |b| {
        b.iter(|| {
            let mut indexer = Indexer::default();
            for i in 0..10_000u64 {
                indexer.append_entry(i * 100, i * 100 + 100, &at(i as i64)).unwrap();
            }
            indexer
        })
    });

    group.finish();
}

fn bench_point_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_search");
    let (data, _) = create_test_log(100_000);
    let target = at(73_123);

    for accuracy in [0u64, 64 * 1024] {
        group.bench_function(format!("accuracy_{accuracy}"), |b| {
            let mut cursor = Cursor::new(data.as_slice());
            b.iter(|| point_search(&mut cursor, black_box(&target), accuracy).unwrap())
        });
    }

    group.finish();
}

fn bench_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern");
    let pattern = Pattern::parse("/var/log/statuslog/status_%Y%m%d_%H%M.log");
    let name = pattern.build(&at(0));

    group.bench_function("build", |b| b.iter(|| pattern.build(black_box(&at(0)))));

    group.bench_function("match_day", |b| {
        b.iter(|| pattern.matches(black_box(&name), &at(-3600), &at(3600)))
    });

    group.bench_function("match_month", |b| {
        b.iter(|| pattern.matches(black_box(&name), &at(-86400 * 15), &at(86400 * 15)))
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("store");

    group.bench_function("report_single", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let dir = tempdir().unwrap();
                let config = StoreConfig::new(dir.path().join("status.log").to_string_lossy());
                let store = Store::new(config, Box::new(std::io::sink())).await.unwrap();
                let source = Url::parse("dummy:#bench").unwrap();
                let records = create_test_records(iters as usize);

                let start = std::time::Instant::now();

                for record in records {
                    store.report(&source, record).await.unwrap();
                }
                store.close().await.unwrap();

                start.elapsed()
            })
        });
    });

    group.bench_function("restore_10000", |b| {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.log");
        let (data, _) = create_test_log(10_000);
        std::fs::write(&path, data).unwrap();

        b.iter_custom(|iters| {
            rt.block_on(async {
                let clock = Arc::new(ManualClock::new(at(0)));
                let config = StoreConfig::new(path.to_string_lossy());
                let store = Store::with_clock(config, Box::new(std::io::sink()), clock)
                    .await
                    .unwrap();

                let start = std::time::Instant::now();

                for _ in 0..iters {
                    store.restore().await.unwrap();
                }

                let elapsed = start.elapsed();
                store.close().await.unwrap();
                elapsed
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_codec,
    bench_index,
    bench_point_search,
    bench_pattern,
    bench_store
);
criterion_main!(benches);
