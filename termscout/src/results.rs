/// Benchmark records and the sinks that persist them.
///
/// A [`BenchmarkRecord`] is one (strategy, corpus) observation. It either
/// completed with a [`Measurement`] or failed with a classified error. Records
/// are flattened to [`RecordRow`]s for output, one JSON object per line with
/// the columns `strategy, corpus, occurrences, failed_units, duration_ns,
/// error`.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::count::{Strategy, Tally};
use crate::errors::{CountError, FailureKind};

/// What a completed invocation produced and how long it took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub occurrences: u64,
    pub failed_units: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordStatus {
    Completed(Measurement),
    Failed { kind: FailureKind, error: String },
}

/// One measured (strategy, corpus) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkRecord {
    pub strategy: Strategy,
    pub corpus: String,
    pub status: RecordStatus,
}

impl BenchmarkRecord {
    pub fn completed(
        strategy: Strategy,
        corpus: impl Into<String>,
        tally: Tally,
        duration: Duration,
    ) -> Self {
        Self {
            strategy,
            corpus: corpus.into(),
            status: RecordStatus::Completed(Measurement {
                occurrences: tally.occurrences,
                failed_units: tally.failed_units,
                duration,
            }),
        }
    }

    pub fn failed(strategy: Strategy, corpus: impl Into<String>, error: &CountError) -> Self {
        Self {
            strategy,
            corpus: corpus.into(),
            status: RecordStatus::Failed {
                kind: error.kind(),
                error: error.to_string(),
            },
        }
    }

    pub fn measurement(&self) -> Option<&Measurement> {
        match &self.status {
            RecordStatus::Completed(m) => Some(m),
            RecordStatus::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.measurement().is_some()
    }

    pub fn occurrences(&self) -> Option<u64> {
        self.measurement().map(|m| m.occurrences)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.measurement().map(|m| m.duration)
    }
}

/// Flat, serializable form of a record. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRow {
    pub strategy: Strategy,
    pub corpus: String,
    pub occurrences: Option<u64>,
    pub failed_units: Option<u64>,
    pub duration_ns: Option<u64>,
    pub error: Option<String>,
}

impl From<&BenchmarkRecord> for RecordRow {
    fn from(record: &BenchmarkRecord) -> Self {
        match &record.status {
            RecordStatus::Completed(m) => RecordRow {
                strategy: record.strategy,
                corpus: record.corpus.clone(),
                occurrences: Some(m.occurrences),
                failed_units: Some(m.failed_units),
                duration_ns: Some(u64::try_from(m.duration.as_nanos()).unwrap_or(u64::MAX)),
                error: None,
            },
            RecordStatus::Failed { error, .. } => RecordRow {
                strategy: record.strategy,
                corpus: record.corpus.clone(),
                occurrences: None,
                failed_units: None,
                duration_ns: None,
                error: Some(error.clone()),
            },
        }
    }
}

/// Receives the full, ordered list of records at the end of a run
pub trait RecordSink {
    fn write_records(&mut self, records: &[BenchmarkRecord]) -> io::Result<()>;
}

/// Writes one JSON object per record to a file
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    path: PathBuf,
}

impl JsonLinesSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonLinesSink {
    fn write_records(&mut self, records: &[BenchmarkRecord]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        write_json_lines(&mut writer, records)?;
        writer.flush()
    }
}

/// Serializes `records` as JSON lines into any writer
pub fn write_json_lines<W: Write>(writer: &mut W, records: &[BenchmarkRecord]) -> io::Result<()> {
    for record in records {
        serde_json::to_writer(&mut *writer, &RecordRow::from(record))?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Keeps records in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<BenchmarkRecord>,
}

impl RecordSink for MemorySink {
    fn write_records(&mut self, records: &[BenchmarkRecord]) -> io::Result<()> {
        self.records.extend_from_slice(records);
        Ok(())
    }
}

/// Totals over a list of records
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    /// Occurrence counts per corpus, one entry per completed strategy
    pub counts: BTreeMap<String, Vec<(Strategy, u64)>>,
}

impl RunSummary {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_record(&mut self, record: &BenchmarkRecord) {
        match record.occurrences() {
            Some(occurrences) => {
                self.completed += 1;
                self.counts
                    .entry(record.corpus.clone())
                    .or_default()
                    .push((record.strategy, occurrences));
            }
            None => self.failed += 1,
        }
    }

    pub fn from_records(records: &[BenchmarkRecord]) -> Self {
        let mut summary = Self::new();
        for record in records {
            summary.add_record(record);
        }
        summary
    }

    /// Corpora on which completed strategies reported different counts
    pub fn disagreements(&self) -> Vec<&str> {
        self.counts
            .iter()
            .filter(|(_, counts)| counts.windows(2).any(|w| w[0].1 != w[1].1))
            .map(|(corpus, _)| corpus.as_str())
            .collect()
    }
}
