use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::matcher::TokenMatcher;
use super::Tally;
use crate::config::EncodingMode;
use crate::corpus::{decode_line, Corpus};
use crate::errors::{CountError, CountResult};
use crate::metrics::PipelineMetrics;

/// Why a single line did not contribute to the total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFailure {
    /// The line is not valid UTF-8 under fail-fast decoding
    Malformed { line: u64 },
    /// Matching the line panicked
    Panicked { line: u64 },
    /// The shutdown timeout fired before the line was processed
    Cancelled { line: u64 },
}

/// Counts a corpus by handing every line to a bounded worker pool.
///
/// Each run builds its own pool of exactly `worker_count` threads and tears it
/// down before returning. Results are collected in submission order and
/// summed on the calling thread, so the answer does not depend on the number
/// of workers or on scheduling.
///
/// Failures are per line. Under [`EncodingMode::FailFast`] a line that is not
/// valid UTF-8 becomes one failed unit in a completed [`Tally`], where the
/// serial and device counters fail the whole corpus with an encoding error.
/// Records for the same corpus can therefore differ in shape while agreeing
/// on every line that did decode.
#[derive(Debug, Clone)]
pub struct ParallelCounter {
    worker_count: NonZeroUsize,
    shutdown_timeout: Duration,
    encoding_mode: EncodingMode,
    metrics: PipelineMetrics,
    #[cfg(test)]
    unit_delay: Duration,
}

impl ParallelCounter {
    pub fn new(
        worker_count: NonZeroUsize,
        shutdown_timeout: Duration,
        encoding_mode: EncodingMode,
    ) -> Self {
        Self::with_metrics(
            worker_count,
            shutdown_timeout,
            encoding_mode,
            PipelineMetrics::new(),
        )
    }

    pub fn with_metrics(
        worker_count: NonZeroUsize,
        shutdown_timeout: Duration,
        encoding_mode: EncodingMode,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            worker_count,
            shutdown_timeout,
            encoding_mode,
            metrics,
            #[cfg(test)]
            unit_delay: Duration::ZERO,
        }
    }

    pub fn worker_count(&self) -> NonZeroUsize {
        self.worker_count
    }

    /// Counts `corpus` on a fresh pool.
    ///
    /// If the units have not all finished within the shutdown timeout the run
    /// is cancelled: units not yet started are skipped and reported in
    /// `failed_units`. The pool's threads are confirmed gone before returning.
    pub fn run(&self, corpus: &Corpus, matcher: &TokenMatcher) -> CountResult<Tally> {
        let lines = self.read_lines(corpus)?;
        debug!(
            "Parallel count of '{}' in {}: {} lines on {} workers",
            matcher.term(),
            corpus.label(),
            lines.len(),
            self.worker_count
        );

        let workers = self.worker_count.get();
        let (exit_tx, exit_rx) = mpsc::channel::<usize>();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("termscout-worker-{}", i))
            .exit_handler(move |i| {
                let _ = exit_tx.send(i);
            })
            .build()
            .map_err(|e| CountError::Io(std::io::Error::other(e)))?;

        let cancel = Arc::new(AtomicBool::new(false));
        let watchdog = Watchdog::arm(self.shutdown_timeout, Arc::clone(&cancel))?;
        let outcomes = pool.install(|| self.process_units(corpus, &lines, matcher, &cancel));
        watchdog.disarm();

        drop(pool);
        self.await_pool_exit(&exit_rx, workers)?;

        Ok(self.reduce(corpus, &outcomes))
    }

    fn read_lines(&self, corpus: &Corpus) -> CountResult<Vec<Vec<u8>>> {
        let mut reader = corpus.lines()?;
        let mut lines = Vec::new();
        let mut buf = Vec::with_capacity(256);
        while reader.next_line(&mut buf)? {
            lines.push(buf.clone());
        }
        self.metrics
            .record_load(reader.bytes_read(), reader.line_number());
        Ok(lines)
    }

    /// Runs one unit per line. Must be called inside the pool.
    fn process_units(
        &self,
        corpus: &Corpus,
        lines: &[Vec<u8>],
        matcher: &TokenMatcher,
        cancel: &AtomicBool,
    ) -> Vec<Result<u64, UnitFailure>> {
        lines
            .par_iter()
            .enumerate()
            .map(|(index, bytes)| {
                let line = index as u64 + 1;
                if cancel.load(Ordering::Relaxed) {
                    return Err(UnitFailure::Cancelled { line });
                }
                #[cfg(test)]
                thread::sleep(self.unit_delay);
                let text = decode_line(bytes, corpus.path(), line, self.encoding_mode)
                    .map_err(|_| UnitFailure::Malformed { line })?;
                let found = panic::catch_unwind(AssertUnwindSafe(|| matcher.count(&text)))
                    .map_err(|_| UnitFailure::Panicked { line })?;
                trace!("Unit {} counted {}", line, found);
                Ok(found)
            })
            .collect()
    }

    fn reduce(&self, corpus: &Corpus, outcomes: &[Result<u64, UnitFailure>]) -> Tally {
        let mut tally = Tally::default();
        let mut cancelled = 0u64;
        for outcome in outcomes {
            match outcome {
                Ok(found) => tally.occurrences += found,
                Err(UnitFailure::Cancelled { .. }) => {
                    cancelled += 1;
                    tally.failed_units += 1;
                }
                Err(failure) => {
                    warn!("Unit failed in {}: {:?}", corpus.label(), failure);
                    tally.failed_units += 1;
                }
            }
        }
        if cancelled > 0 {
            warn!(
                "{} of {} units in {} cancelled after {:?}",
                cancelled,
                outcomes.len(),
                corpus.label(),
                self.shutdown_timeout
            );
        }
        self.metrics
            .record_units(outcomes.len() as u64, tally.failed_units);
        tally
    }

    fn await_pool_exit(&self, exit_rx: &mpsc::Receiver<usize>, workers: usize) -> CountResult<()> {
        let deadline = Instant::now() + self.shutdown_timeout;
        for _ in 0..workers {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if exit_rx.recv_timeout(remaining).is_err() {
                warn!(
                    "Worker pool still running {:?} after shutdown",
                    self.shutdown_timeout
                );
                return Err(CountError::PoolShutdown(self.shutdown_timeout));
            }
        }
        trace!("All {} workers exited", workers);
        Ok(())
    }
}

/// Sets the cancel flag if not disarmed within the timeout
struct Watchdog {
    done_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    fn arm(timeout: Duration, cancel: Arc<AtomicBool>) -> std::io::Result<Self> {
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("termscout-watchdog".to_string())
            .spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    warn!("Parallel count exceeded {:?}, cancelling", timeout);
                    cancel.store(true, Ordering::Relaxed);
                }
            })?;
        Ok(Self { done_tx, handle })
    }

    fn disarm(self) {
        let _ = self.done_tx.send(());
        if self.handle.join().is_err() {
            warn!("Watchdog thread panicked");
        }
    }
}
