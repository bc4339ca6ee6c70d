use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BenchConfig;
use crate::corpus::Corpus;
use crate::count::{matcher_for, ParallelCounter, SerialCounter, TermCounter, TokenMatcher};
use crate::device::{ComputeBackend, DeviceCounter};
use crate::errors::HarnessError;
use crate::metrics::PipelineMetrics;
use crate::results::{BenchmarkRecord, RecordSink};

/// Runs every counter over every corpus and records what each one reports.
///
/// Corpora are visited in configuration order; within a corpus the counters
/// run in the order they were given (Serial, ParallelCPU, DeviceOffload for
/// [`BenchmarkHarness::new`]). A failing invocation becomes a failed record
/// and the run moves on.
pub struct BenchmarkHarness {
    corpora: Vec<Corpus>,
    matcher: TokenMatcher,
    counters: Vec<Box<dyn TermCounter>>,
    metrics: PipelineMetrics,
}

impl BenchmarkHarness {
    /// Builds the three standard counters from `config`. Device offload runs
    /// on `backend`.
    ///
    /// Fails with [`HarnessError::Config`] when the term, corpus globs or
    /// shutdown timeout are invalid.
    pub fn new<B>(config: &BenchConfig, backend: B) -> Result<Self, HarnessError>
    where
        B: ComputeBackend + 'static,
    {
        let corpora = config.resolve_corpora()?;
        let matcher = matcher_for(&config.term)?;
        let shutdown_timeout = config.shutdown_timeout()?;
        let metrics = PipelineMetrics::new();

        let counters: Vec<Box<dyn TermCounter>> = vec![
            Box::new(SerialCounter::with_metrics(
                config.encoding_mode,
                metrics.clone(),
            )),
            Box::new(ParallelCounter::with_metrics(
                config.worker_count,
                shutdown_timeout,
                config.encoding_mode,
                metrics.clone(),
            )),
            Box::new(DeviceCounter::with_metrics(
                backend,
                &config.device,
                config.encoding_mode,
                metrics.clone(),
            )),
        ];

        Ok(Self {
            corpora,
            matcher,
            counters,
            metrics,
        })
    }

    /// A harness over an explicit set of counters
    pub fn with_counters(
        corpora: Vec<Corpus>,
        matcher: TokenMatcher,
        counters: Vec<Box<dyn TermCounter>>,
    ) -> Self {
        Self {
            corpora,
            matcher,
            counters,
            metrics: PipelineMetrics::new(),
        }
    }

    pub fn corpora(&self) -> &[Corpus] {
        &self.corpora
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Number of records a full run produces
    pub fn total_runs(&self) -> usize {
        self.corpora.len() * self.counters.len()
    }

    pub fn run_all(&mut self) -> Vec<BenchmarkRecord> {
        self.run_with_progress(|_| {})
    }

    /// Like [`run_all`](Self::run_all), calling `on_record` as each record is made
    pub fn run_with_progress<F>(&mut self, mut on_record: F) -> Vec<BenchmarkRecord>
    where
        F: FnMut(&BenchmarkRecord),
    {
        info!(
            "Counting '{}' in {} corpora with {} strategies",
            self.matcher.term(),
            self.corpora.len(),
            self.counters.len()
        );
        if self.corpora.is_empty() {
            warn!("No corpora configured");
        }

        let mut records = Vec::with_capacity(self.total_runs());
        for corpus in &self.corpora {
            info!("Corpus {}", corpus.label());
            for counter in self.counters.iter_mut() {
                let record = time_invocation(counter.as_mut(), corpus, &self.matcher);
                on_record(&record);
                records.push(record);
            }
        }

        self.metrics.log_stats();
        let failed = records.iter().filter(|r| !r.is_completed()).count();
        info!(
            "Run complete: {} records, {} failed",
            records.len(),
            failed
        );
        records
    }

    /// Runs everything, then hands the records to `sink`.
    ///
    /// On sink failure the records travel back inside the error.
    pub fn run_and_persist<S>(&mut self, sink: &mut S) -> Result<Vec<BenchmarkRecord>, HarnessError>
    where
        S: RecordSink + ?Sized,
    {
        self.run_and_persist_with_progress(sink, |_| {})
    }

    /// [`run_and_persist`](Self::run_and_persist) with a per-record callback
    pub fn run_and_persist_with_progress<S, F>(
        &mut self,
        sink: &mut S,
        on_record: F,
    ) -> Result<Vec<BenchmarkRecord>, HarnessError>
    where
        S: RecordSink + ?Sized,
        F: FnMut(&BenchmarkRecord),
    {
        let records = self.run_with_progress(on_record);
        match sink.write_records(&records) {
            Ok(()) => {
                debug!("Persisted {} records", records.len());
                Ok(records)
            }
            Err(source) => Err(HarnessError::Sink { source, records }),
        }
    }
}

/// Times one counting call. Only the call itself is inside the timed span.
pub fn time_invocation(
    counter: &mut dyn TermCounter,
    corpus: &Corpus,
    matcher: &TokenMatcher,
) -> BenchmarkRecord {
    let strategy = counter.strategy();
    let start = Instant::now();
    let outcome = counter.count(corpus, matcher);
    let duration = start.elapsed();

    match outcome {
        Ok(tally) => {
            debug!(
                "{} on {}: {} occurrences ({} failed units) in {:?}",
                strategy,
                corpus.label(),
                tally.occurrences,
                tally.failed_units,
                duration
            );
            BenchmarkRecord::completed(strategy, corpus.label(), tally, duration)
        }
        Err(e) => {
            warn!("{} on {} failed: {}", strategy, corpus.label(), e);
            BenchmarkRecord::failed(strategy, corpus.label(), &e)
        }
    }
}
