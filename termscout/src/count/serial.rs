use tracing::{debug, trace};

use super::matcher::TokenMatcher;
use super::Tally;
use crate::config::EncodingMode;
use crate::corpus::{decode_line, Corpus};
use crate::errors::CountResult;
use crate::metrics::PipelineMetrics;

/// Counts a corpus line by line on the calling thread.
///
/// This is the reference implementation: any disagreement between it and
/// another strategy is a bug in the other strategy.
#[derive(Debug, Clone)]
pub struct SerialCounter {
    encoding_mode: EncodingMode,
    metrics: PipelineMetrics,
}

impl SerialCounter {
    pub fn new(encoding_mode: EncodingMode) -> Self {
        Self::with_metrics(encoding_mode, PipelineMetrics::new())
    }

    pub fn with_metrics(encoding_mode: EncodingMode, metrics: PipelineMetrics) -> Self {
        Self {
            encoding_mode,
            metrics,
        }
    }

    /// Streams `corpus` and sums the matches of every line.
    ///
    /// Read and decoding errors abort the whole invocation; there is no
    /// partial result.
    pub fn run(&self, corpus: &Corpus, matcher: &TokenMatcher) -> CountResult<Tally> {
        debug!("Serial count of '{}' in {}", matcher.term(), corpus.label());

        let mut reader = corpus.lines()?;
        let mut buf = Vec::with_capacity(256);
        let mut occurrences = 0u64;

        while reader.next_line(&mut buf)? {
            let line = decode_line(
                &buf,
                reader.path(),
                reader.line_number(),
                self.encoding_mode,
            )?;
            let found = matcher.count(&line);
            if found > 0 {
                trace!("Line {}: {} matches", reader.line_number(), found);
            }
            occurrences += found;
        }

        self.metrics
            .record_load(reader.bytes_read(), reader.line_number());
        Ok(Tally::new(occurrences))
    }
}
