use anyhow::Result;
use std::fs::{self, File};
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::tempdir;
use termscout::config::{CorpusSpec, DeviceConfig};
use termscout::errors::FailureKind;
use termscout::results::{MemorySink, RecordStatus};
use termscout::{
    matcher_for, BenchConfig, BenchmarkHarness, BenchmarkRecord, Corpus, DeviceCounter,
    EmulatedBackend, EncodingMode, HarnessError, ParallelCounter, RecordSink, SerialCounter,
    Strategy, TermCounter,
};

fn create_corpus(dir: &Path, name: &str, lines: usize) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut file = File::create(&path)?;
    for i in 0..lines {
        writeln!(file, "Call me Ishmael. Some years ago, line {} of the Whale.", i)?;
        writeln!(file, "whalebone whale_oil the WHALE, the whale! white-whale")?;
        writeln!(file, "nothing to see here {}", i)?;
    }
    Ok(path)
}

fn counters(workers: usize) -> Vec<Box<dyn TermCounter>> {
    vec![
        Box::new(SerialCounter::new(EncodingMode::FailFast)),
        Box::new(ParallelCounter::new(
            NonZeroUsize::new(workers).unwrap(),
            Duration::from_secs(60),
            EncodingMode::FailFast,
        )),
        Box::new(DeviceCounter::new(
            EmulatedBackend::new(),
            &DeviceConfig::default(),
            EncodingMode::FailFast,
        )),
    ]
}

fn count_all(path: &Path, term: &str) -> Result<Vec<u64>> {
    let corpus = Corpus::new(path);
    let matcher = matcher_for(term)?;
    let mut found = Vec::new();
    for mut counter in counters(4) {
        found.push(counter.count(&corpus, &matcher)?.occurrences);
    }
    Ok(found)
}

#[test]
fn test_strategies_agree() -> Result<()> {
    let dir = tempdir()?;
    let path = create_corpus(dir.path(), "moby.txt", 500)?;

    // Per group: Whale, WHALE, whale, white-whale
    assert_eq!(count_all(&path, "whale")?, vec![2000, 2000, 2000]);
    assert_eq!(count_all(&path, "ishmael")?, vec![500, 500, 500]);
    assert_eq!(count_all(&path, "whalebone")?, vec![500, 500, 500]);
    assert_eq!(count_all(&path, "absent")?, vec![0, 0, 0]);
    Ok(())
}

#[test]
fn test_reference_sentences() -> Result<()> {
    let dir = tempdir()?;
    let cases = [
        ("Cat sat on the cat.", 2),
        ("category cat scatter", 1),
        ("cat, cat! cat?", 3),
    ];
    for (i, (text, expected)) in cases.iter().enumerate() {
        let path = dir.path().join(format!("case_{}.txt", i));
        fs::write(&path, text)?;
        assert_eq!(count_all(&path, "cat")?, vec![*expected; 3], "{:?}", text);
    }
    Ok(())
}

#[test]
fn test_parallel_invariant_in_worker_count() -> Result<()> {
    let dir = tempdir()?;
    let path = create_corpus(dir.path(), "moby.txt", 300)?;
    let corpus = Corpus::new(&path);
    let matcher = matcher_for("whale")?;

    for workers in 1..=8 {
        let counter = ParallelCounter::new(
            NonZeroUsize::new(workers).unwrap(),
            Duration::from_secs(60),
            EncodingMode::FailFast,
        );
        assert_eq!(counter.run(&corpus, &matcher)?.occurrences, 1200);
    }
    Ok(())
}

#[test]
fn test_counters_are_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let path = create_corpus(dir.path(), "moby.txt", 50)?;
    let corpus = Corpus::new(&path);
    let matcher = matcher_for("whale")?;

    for mut counter in counters(3) {
        let first = counter.count(&corpus, &matcher)?;
        let second = counter.count(&corpus, &matcher)?;
        assert_eq!(first, second, "{} changed between calls", counter.strategy());
    }
    Ok(())
}

#[test]
fn test_empty_corpus_is_zero_everywhere() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("empty.txt");
    fs::write(&path, "")?;
    assert_eq!(count_all(&path, "word")?, vec![0, 0, 0]);
    Ok(())
}

#[test]
fn test_term_longer_than_corpus() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("tiny.txt");
    fs::write(&path, "whal")?;
    assert_eq!(count_all(&path, "whale")?, vec![0, 0, 0]);
    Ok(())
}

#[test]
fn test_large_corpus_is_memory_mapped_for_device() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("large.txt");
    let line = "the whale and the sea and the whale again\n";
    let repeats = (11 * 1024 * 1024) / line.len() + 1;
    fs::write(&path, line.repeat(repeats))?;

    let expected = repeats as u64 * 2;
    assert_eq!(count_all(&path, "whale")?, vec![expected; 3]);
    Ok(())
}

#[test]
fn test_harness_isolates_missing_corpus() -> Result<()> {
    let dir = tempdir()?;
    let first = create_corpus(dir.path(), "first.txt", 10)?;
    let doomed = create_corpus(dir.path(), "doomed.txt", 10)?;
    let last = create_corpus(dir.path(), "last.txt", 10)?;

    let config = BenchConfig {
        corpora: [&first, &doomed, &last]
            .iter()
            .map(|p| CorpusSpec {
                path: p.to_path_buf(),
                label: None,
            })
            .collect(),
        term: "whale".to_string(),
        worker_count: NonZeroUsize::new(2).unwrap(),
        ..BenchConfig::default()
    };
    let mut harness = BenchmarkHarness::new(&config, EmulatedBackend::new())?;
    fs::remove_file(&doomed)?;

    let records = harness.run_all();
    assert_eq!(records.len(), 9);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.strategy, Strategy::ALL[i % 3]);
        if record.corpus == "doomed.txt" {
            assert!(matches!(
                record.status,
                RecordStatus::Failed {
                    kind: FailureKind::Io,
                    ..
                }
            ));
        } else {
            assert_eq!(record.occurrences(), Some(40));
        }
    }
    Ok(())
}

#[test]
fn test_harness_from_globs_with_labels() -> Result<()> {
    let dir = tempdir()?;
    create_corpus(dir.path(), "b.txt", 1)?;
    create_corpus(dir.path(), "a.txt", 2)?;
    let named = create_corpus(dir.path(), "named.dat", 3)?;

    let config = BenchConfig {
        corpora: vec![CorpusSpec {
            path: named,
            label: Some("moby-dick".to_string()),
        }],
        corpus_globs: vec![format!("{}/*.txt", dir.path().display())],
        term: "ishmael".to_string(),
        ..BenchConfig::default()
    };
    let mut harness = BenchmarkHarness::new(&config, EmulatedBackend::new())?;
    let labels: Vec<&str> = harness.corpora().iter().map(|c| c.label()).collect();
    assert_eq!(labels, vec!["moby-dick", "a.txt", "b.txt"]);

    let records = harness.run_all();
    let counts: Vec<u64> = records.iter().filter_map(|r| r.occurrences()).collect();
    assert_eq!(counts, vec![3, 3, 3, 2, 2, 2, 1, 1, 1]);
    Ok(())
}

#[test]
fn test_lossy_mode_counts_around_bad_bytes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("latin1.txt");
    fs::write(&path, b"caf\xe9 whale\nwhale\xff whale\n")?;
    let corpus = Corpus::new(&path);
    let matcher = matcher_for("whale")?;

    let mut strict = SerialCounter::new(EncodingMode::FailFast);
    assert!(strict.count(&corpus, &matcher).is_err());

    let mut lossy: Vec<Box<dyn TermCounter>> = vec![
        Box::new(SerialCounter::new(EncodingMode::Lossy)),
        Box::new(ParallelCounter::new(
            NonZeroUsize::new(2).unwrap(),
            Duration::from_secs(60),
            EncodingMode::Lossy,
        )),
        Box::new(DeviceCounter::new(
            EmulatedBackend::new(),
            &DeviceConfig::default(),
            EncodingMode::Lossy,
        )),
    ];
    for counter in lossy.iter_mut() {
        assert_eq!(counter.count(&corpus, &matcher)?.occurrences, 3);
    }
    Ok(())
}

struct ReadOnlyDisk;

impl RecordSink for ReadOnlyDisk {
    fn write_records(&mut self, _: &[BenchmarkRecord]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
    }
}

#[test]
fn test_sink_failure_returns_records() -> Result<()> {
    let dir = tempdir()?;
    let path = create_corpus(dir.path(), "moby.txt", 5)?;
    let config = BenchConfig {
        corpora: vec![CorpusSpec { path, label: None }],
        term: "whale".to_string(),
        ..BenchConfig::default()
    };

    let mut harness = BenchmarkHarness::new(&config, EmulatedBackend::new())?;
    match harness.run_and_persist(&mut ReadOnlyDisk) {
        Err(HarnessError::Sink { source, records }) => {
            assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            assert_eq!(records.len(), 3);
            assert!(records.iter().all(|r| r.occurrences() == Some(20)));
        }
        other => panic!("expected a sink error, got {:?}", other.is_ok()),
    }

    let mut sink = MemorySink::default();
    let records = harness.run_and_persist(&mut sink)?;
    assert_eq!(sink.records.len(), records.len());
    Ok(())
}

#[test]
fn test_failfast_bad_line_fails_whole_corpus_except_parallel() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("mixed.txt");
    fs::write(&path, b"whale\nthe \xff whale\nwhale whale\n")?;

    let mut harness =
        BenchmarkHarness::with_counters(vec![Corpus::new(&path)], matcher_for("whale")?, counters(2));
    let records = harness.run_all();
    assert_eq!(records.len(), 3);

    assert_eq!(records[0].strategy, Strategy::Serial);
    assert!(!records[0].is_completed());

    assert_eq!(records[1].strategy, Strategy::ParallelCpu);
    let measurement = records[1]
        .measurement()
        .expect("parallel run completes with a failed unit");
    assert_eq!(measurement.occurrences, 3);
    assert_eq!(measurement.failed_units, 1);

    assert_eq!(records[2].strategy, Strategy::DeviceOffload);
    assert!(!records[2].is_completed());
    Ok(())
}
