/// Counting strategies.
///
/// Three counters answer the same question, "how many times does this word
/// occur in this corpus?", in three different ways:
///
/// 1. **Serial** ([`SerialCounter`]): streams the corpus one line at a time
///    on the calling thread. It is the reference answer every other strategy
///    must reproduce.
/// 2. **Parallel CPU** ([`ParallelCounter`]): turns every line into an
///    independent unit, runs the units on a private rayon pool of a fixed size
///    and sums the partial counts on the caller's thread in submission order.
/// 3. **Device offload** ([`DeviceCounter`](crate::device::DeviceCounter)):
///    copies the whole corpus to a compute device and launches one work-item
///    per byte offset.
///
/// # Tokenization
///
/// All three share one policy, implemented on the host by [`TokenMatcher`]:
/// ASCII case folding and ASCII word boundaries on both sides of the term.
/// The device reproduces it byte by byte.
///
/// ```rust,ignore
/// let matcher = TokenMatcher::new(Term::new("whale")?)?;
/// let serial = SerialCounter::new(EncodingMode::FailFast).run(&corpus, &matcher)?;
/// let parallel = ParallelCounter::new(workers, timeout, EncodingMode::FailFast)
///     .run(&corpus, &matcher)?;
/// assert_eq!(serial.occurrences, parallel.occurrences);
/// ```
///
/// # Failures
///
/// A counter either returns a [`Tally`] or a [`CountError`]. Failures of single
/// units (an undecodable line, a cancelled unit) do not abort the run; they
/// are excluded from `occurrences` and counted in `failed_units`.
pub mod matcher;
pub mod parallel;
pub mod serial;

pub use matcher::{is_word_byte, Term, TokenMatcher};
pub use parallel::ParallelCounter;
pub use serial::SerialCounter;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::corpus::Corpus;
use crate::errors::{CountError, CountResult};

/// Execution strategy of a counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    Serial,
    #[serde(rename = "ParallelCPU")]
    ParallelCpu,
    DeviceOffload,
}

impl Strategy {
    /// Harness order
    pub const ALL: [Strategy; 3] = [
        Strategy::Serial,
        Strategy::ParallelCpu,
        Strategy::DeviceOffload,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Serial => "Serial",
            Strategy::ParallelCpu => "ParallelCPU",
            Strategy::DeviceOffload => "DeviceOffload",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one counting invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Occurrences found in the units that completed
    pub occurrences: u64,
    /// Units whose contribution is missing from `occurrences`
    pub failed_units: u64,
}

impl Tally {
    pub fn new(occurrences: u64) -> Self {
        Self {
            occurrences,
            failed_units: 0,
        }
    }
}

/// A counting strategy the harness can drive
pub trait TermCounter {
    fn strategy(&self) -> Strategy;

    /// Counts whole-word occurrences of the matcher's term in `corpus`
    fn count(&mut self, corpus: &Corpus, matcher: &TokenMatcher) -> CountResult<Tally>;
}

impl TermCounter for SerialCounter {
    fn strategy(&self) -> Strategy {
        Strategy::Serial
    }

    fn count(&mut self, corpus: &Corpus, matcher: &TokenMatcher) -> CountResult<Tally> {
        self.run(corpus, matcher)
    }
}

impl TermCounter for ParallelCounter {
    fn strategy(&self) -> Strategy {
        Strategy::ParallelCpu
    }

    fn count(&mut self, corpus: &Corpus, matcher: &TokenMatcher) -> CountResult<Tally> {
        self.run(corpus, matcher)
    }
}

/// Builds a matcher for a raw term string
pub fn matcher_for(term: &str) -> Result<TokenMatcher, CountError> {
    TokenMatcher::new(Term::new(term)?)
}
