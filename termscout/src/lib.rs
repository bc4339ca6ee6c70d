pub mod config;
pub mod corpus;
pub mod count;
pub mod device;
pub mod errors;
pub mod harness;
pub mod metrics;
pub mod results;

pub use config::{BenchConfig, ConfigOverrides, DeviceConfig, EncodingMode};
pub use corpus::Corpus;
pub use count::{
    matcher_for, ParallelCounter, SerialCounter, Strategy, Tally, TermCounter, TokenMatcher,
};
pub use device::{default_backend, ComputeBackend, DeviceClass, DeviceCounter, EmulatedBackend};
pub use errors::{CountError, CountResult, DeviceError, HarnessError};
pub use harness::BenchmarkHarness;
pub use results::{BenchmarkRecord, JsonLinesSink, RecordSink, RunSummary};

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber on stderr. `RUST_LOG` wins over `level` when set.
/// Does nothing if a global subscriber is already installed.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
