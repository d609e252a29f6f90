//! Benchmarks for MeridianKV storage operations

use criterion::{criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use meridiankv::wal::{LogEntry, Operation, WalWriter};
use meridiankv::{Config, StateEngine};

fn wal_append(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let mut writer = WalWriter::open(&temp.path().join("bench.wal"), 1).unwrap();

    c.bench_function("wal_append_fsync", |b| {
        b.iter(|| {
            let mut entry = LogEntry::new(
                0,
                Operation::Set {
                    key: "bench-key".to_string(),
                    value: "bench-value".to_string(),
                },
            );
            writer.append(&mut entry).unwrap();
        })
    });
}

fn engine_writes(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .snapshot_every(100_000)
        .build();
    let engine = StateEngine::open(config, 0).unwrap();

    c.bench_function("engine_submit_set", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            engine
                .submit_local(
                    Operation::Set {
                        key: format!("key{}", i % 1024),
                        value: "value".to_string(),
                    },
                    false,
                )
                .unwrap();
        })
    });

    c.bench_function("engine_get", |b| {
        b.iter(|| engine.get("key1"))
    });
}

criterion_group!(benches, wal_append, engine_writes);
criterion_main!(benches);
