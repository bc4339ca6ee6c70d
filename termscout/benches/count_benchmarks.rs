use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs::File;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;
use termscout::config::DeviceConfig;
use termscout::{
    matcher_for, Corpus, DeviceCounter, EmulatedBackend, EncodingMode, ParallelCounter,
    SerialCounter,
};

fn create_corpus(dir: &Path, lines: usize) -> std::io::Result<PathBuf> {
    let path = dir.join(format!("corpus_{}.txt", lines));
    let mut file = File::create(&path)?;
    for i in 0..lines {
        writeln!(
            file,
            "Line {} the whale surfaced; whalers cried WHALE and the whale dove again",
            i
        )?;
    }
    Ok(path)
}

fn bench_strategies(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let matcher = matcher_for("whale").unwrap();
    let mut group = c.benchmark_group("count_strategies");

    for lines in [1_000, 20_000] {
        let corpus = Corpus::new(create_corpus(dir.path(), lines).unwrap());

        let serial = SerialCounter::new(EncodingMode::FailFast);
        group.bench_with_input(BenchmarkId::new("serial", lines), &corpus, |b, corpus| {
            b.iter(|| black_box(serial.run(corpus, &matcher).unwrap()))
        });

        let parallel = ParallelCounter::new(
            NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN),
            Duration::from_secs(60),
            EncodingMode::FailFast,
        );
        group.bench_with_input(BenchmarkId::new("parallel", lines), &corpus, |b, corpus| {
            b.iter(|| black_box(parallel.run(corpus, &matcher).unwrap()))
        });

        let mut device = DeviceCounter::new(
            EmulatedBackend::new(),
            &DeviceConfig::default(),
            EncodingMode::FailFast,
        );
        group.bench_with_input(BenchmarkId::new("device", lines), &corpus, |b, corpus| {
            b.iter(|| black_box(device.run(corpus, &matcher).unwrap()))
        });
    }

    group.finish();
}

fn bench_worker_scaling(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let corpus = Corpus::new(create_corpus(dir.path(), 20_000).unwrap());
    let matcher = matcher_for("whale").unwrap();
    let mut group = c.benchmark_group("parallel_workers");

    for workers in [1, 2, 4, 8] {
        let counter = ParallelCounter::new(
            NonZeroUsize::new(workers).unwrap(),
            Duration::from_secs(60),
            EncodingMode::FailFast,
        );
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.iter(|| black_box(counter.run(&corpus, &matcher).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_strategies, bench_worker_scaling);
criterion_main!(benches);
