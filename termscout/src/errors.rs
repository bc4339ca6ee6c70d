/// Error types for counting, device offload and the benchmark harness.
///
/// Failures fall into four families, and every one of them travels as a value:
///
/// 1. **I/O** - a corpus or kernel source cannot be read, or a corpus shrinks
///    while it is being read. Isolated to one corpus/strategy pair.
/// 2. **Unit-of-work** - a single line or work-item misbehaves. These never
///    surface as an `Err`; they are counted in [`Tally::failed_units`].
/// 3. **Device acquisition** - no device of the requested class, a kernel that
///    does not build, a launch that is rejected. Carried as [`DeviceError`] so
///    callers can tell them apart from plain I/O.
/// 4. **Sink** - results cannot be persisted. Terminal for the run, but the
///    in-memory records are handed back with the error.
///
/// ```rust,ignore
/// match counter.count(&corpus, &term) {
///     Ok(tally) => // use tally.occurrences,
///     Err(CountError::Device(DeviceError::NoDevice { class })) => // skip device runs,
///     Err(e) => // record the failure and keep going
/// }
/// ```
///
/// [`Tally::failed_units`]: crate::count::Tally::failed_units
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::device::DeviceClass;
use crate::results::BenchmarkRecord;

/// Result type for counting operations
pub type CountResult<T> = Result<T, CountError>;

/// Result type for device pipeline stages
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while counting a corpus
#[derive(Error, Debug)]
pub enum CountError {
    #[error("Corpus not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corpus {path} truncated during read: expected {expected} bytes, read {read}")]
    Truncated {
        path: PathBuf,
        expected: u64,
        read: u64,
    },
    #[error("Invalid UTF-8 in {path} at line {line}")]
    Encoding { path: PathBuf, line: u64 },
    #[error("Invalid term: {0}")]
    InvalidTerm(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Cannot read kernel source {path}: {source}")]
    KernelSource {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("Worker pool did not exit within {0:?}")]
    PoolShutdown(std::time::Duration),
}

/// Errors raised while acquiring or driving a compute device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No compute platform available")]
    NoPlatform,
    #[error("No {class} device available")]
    NoDevice { class: DeviceClass },
    #[error("Context creation failed: {0}")]
    Context(String),
    #[error("Command queue creation failed: {0}")]
    Queue(String),
    #[error("Kernel build failed:\n{log}")]
    Build { log: String },
    #[error("Kernel creation failed: {0}")]
    Kernel(String),
    #[error("Buffer allocation failed: {0}")]
    Buffer(String),
    #[error("Kernel launch failed: {0}")]
    Launch(String),
    #[error("Buffer read-back failed: {0}")]
    ReadBack(String),
    #[error("Unknown device handle: {0}")]
    UnknownHandle(String),
}

/// Errors that end a harness run
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Harness setup failed: {0}")]
    Config(#[from] CountError),
    #[error("Failed to persist {} records: {source}", .records.len())]
    Sink {
        source: std::io::Error,
        records: Vec<BenchmarkRecord>,
    },
}

/// Coarse classification stored on failed records
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Io,
    Device,
    Config,
    Pool,
}

impl CountError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn invalid_term(msg: impl Into<String>) -> Self {
        Self::InvalidTerm(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn encoding_error(path: impl Into<PathBuf>, line: u64) -> Self {
        Self::Encoding {
            path: path.into(),
            line,
        }
    }

    /// Maps an `io::Error` raised while opening `path` onto the specific variants
    pub fn from_open(path: &Path, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::Io(e),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Device(_) => FailureKind::Device,
            Self::InvalidTerm(_) | Self::Config(_) => FailureKind::Config,
            Self::PoolShutdown(_) => FailureKind::Pool,
            _ => FailureKind::Io,
        }
    }
}
