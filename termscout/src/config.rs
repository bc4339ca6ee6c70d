use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::corpus::Corpus;
use crate::device::DeviceClass;
use crate::errors::{CountError, CountResult};

/// Configuration for a benchmark run.
///
/// Everything the harness needs arrives through this value; nothing is read
/// from process-wide state once it has been built.
///
/// # Configuration Locations
///
/// Files are layered in order of precedence (later wins):
/// 1. Global `$CONFIG_DIR/termscout/config.yaml`
/// 2. Local `.termscout.yaml` in the current directory
/// 3. Custom file given with `--config`
///
/// # Configuration Format
///
/// ```yaml
/// # Corpora, counted in this order
/// corpora:
///   - path: "resources/DonQuixote.txt"
///   - path: "resources/Dracula.txt"
///     label: "dracula"
///
/// # Extra corpora by glob, expanded and sorted after the list above
/// corpus_globs:
///   - "resources/extra/*.txt"
///
/// # Whole-word term to count (ASCII letters, digits, underscore)
/// term: "word"
///
/// # Threads in the parallel counter's pool (default: CPU cores)
/// worker_count: 4
///
/// # How long the parallel counter waits for its pool before cancelling
/// shutdown_timeout: "60s"
///
/// # How to handle invalid UTF-8 (failfast, lossy)
/// encoding_mode: failfast
///
/// device:
///   class: gpu
///   kernel_path: "kernels/count_term.cl"
///   entry_point: "count_term"
///
/// log_level: "info"
/// output: "results.jsonl"
/// ```
///
/// Command-line flags are applied on top with [`BenchConfig::merge_with_cli`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Corpora to count, in run order
    pub corpora: Vec<CorpusSpec>,

    /// Glob patterns for additional corpora
    pub corpus_globs: Vec<String>,

    /// Term to count
    pub term: String,

    /// Number of threads in the parallel counter's pool
    pub worker_count: NonZeroUsize,

    /// Bounded wait for the worker pool, humantime syntax ("60s", "1m 30s")
    pub shutdown_timeout: String,

    /// How undecodable input is treated
    pub encoding_mode: EncodingMode,

    /// Device selection and kernel source
    pub device: DeviceConfig,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Where to write JSON-lines records, if anywhere
    pub output: Option<PathBuf>,
}

/// A corpus entry in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub label: Option<String>,
}

/// Device-offload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Class of device to select; the first one found wins
    pub class: DeviceClass,

    /// Kernel source file. The bundled `count_term.cl` is used when unset.
    pub kernel_path: Option<PathBuf>,

    /// Name of the kernel entry point
    pub entry_point: String,
}

/// Controls how invalid UTF-8 sequences in a corpus are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Reject the input at the first invalid sequence
    #[default]
    FailFast,
    /// Replace invalid sequences with U+FFFD and keep counting
    Lossy,
}

/// Command-line values that override the loaded configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub corpora: Vec<CorpusSpec>,
    pub corpus_globs: Vec<String>,
    pub term: Option<String>,
    pub worker_count: Option<NonZeroUsize>,
    pub shutdown_timeout: Option<String>,
    pub encoding_mode: Option<EncodingMode>,
    pub device_class: Option<DeviceClass>,
    pub kernel_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub output: Option<PathBuf>,
}

pub const DEFAULT_TERM: &str = "word";
pub const DEFAULT_ENTRY_POINT: &str = "count_term";

fn default_worker_count() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            corpora: Vec::new(),
            corpus_globs: Vec::new(),
            term: DEFAULT_TERM.to_string(),
            worker_count: default_worker_count(),
            shutdown_timeout: "60s".to_string(),
            encoding_mode: EncodingMode::default(),
            device: DeviceConfig::default(),
            log_level: "warn".to_string(),
            output: None,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            class: DeviceClass::Gpu,
            kernel_path: None,
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
        }
    }
}

impl BenchConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from the default locations plus a specific file.
    /// A specific file that does not exist is an error.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let defaults = [
            dirs::config_dir().map(|p| p.join("termscout/config.yaml")),
            Some(PathBuf::from(".termscout.yaml")),
        ];
        for path in defaults.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }

    /// Applies command-line overrides. Corpora given on the command line
    /// replace the configured list rather than extending it.
    pub fn merge_with_cli(mut self, cli: ConfigOverrides) -> Self {
        if !cli.corpora.is_empty() || !cli.corpus_globs.is_empty() {
            self.corpora = cli.corpora;
            self.corpus_globs = cli.corpus_globs;
        }
        if let Some(term) = cli.term {
            self.term = term;
        }
        if let Some(workers) = cli.worker_count {
            self.worker_count = workers;
        }
        if let Some(timeout) = cli.shutdown_timeout {
            self.shutdown_timeout = timeout;
        }
        if let Some(mode) = cli.encoding_mode {
            self.encoding_mode = mode;
        }
        if let Some(class) = cli.device_class {
            self.device.class = class;
        }
        if cli.kernel_path.is_some() {
            self.device.kernel_path = cli.kernel_path;
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        if cli.output.is_some() {
            self.output = cli.output;
        }
        self
    }

    /// Parses `shutdown_timeout`
    pub fn shutdown_timeout(&self) -> CountResult<Duration> {
        humantime::parse_duration(&self.shutdown_timeout).map_err(|e| {
            CountError::config_error(format!(
                "invalid shutdown_timeout '{}': {}",
                self.shutdown_timeout, e
            ))
        })
    }

    /// Returns the corpora in run order: explicit entries first, then each
    /// glob's matches sorted by path.
    pub fn resolve_corpora(&self) -> CountResult<Vec<Corpus>> {
        let mut corpora: Vec<Corpus> = self
            .corpora
            .iter()
            .map(|spec| match &spec.label {
                Some(label) => Corpus::with_label(label.clone(), &spec.path),
                None => Corpus::new(&spec.path),
            })
            .collect();

        for pattern in &self.corpus_globs {
            let entries = glob::glob(pattern).map_err(|e| {
                CountError::config_error(format!("invalid corpus glob '{}': {}", pattern, e))
            })?;
            let mut paths = Vec::new();
            for entry in entries {
                let path = entry.map_err(|e| CountError::Io(e.into()))?;
                if path.is_file() {
                    paths.push(path);
                }
            }
            paths.sort();
            corpora.extend(paths.into_iter().map(|path| Corpus::new(&path)));
        }

        Ok(corpora)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let config_content = r#"
            corpora:
              - path: "books/dracula.txt"
                label: "dracula"
              - path: "books/moby.txt"
            term: "whale"
            worker_count: 4
            shutdown_timeout: "5s"
            encoding_mode: lossy
            device:
              class: cpu
              kernel_path: "kernels/custom.cl"
            log_level: "debug"
        "#;

        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = BenchConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.corpora.len(), 2);
        assert_eq!(config.corpora[0].label.as_deref(), Some("dracula"));
        assert_eq!(config.corpora[1].path, PathBuf::from("books/moby.txt"));
        assert_eq!(config.term, "whale");
        assert_eq!(config.worker_count, NonZeroUsize::new(4).unwrap());
        assert_eq!(config.shutdown_timeout().unwrap(), Duration::from_secs(5));
        assert_eq!(config.encoding_mode, EncodingMode::Lossy);
        assert_eq!(config.device.class, DeviceClass::Cpu);
        assert_eq!(
            config.device.kernel_path,
            Some(PathBuf::from("kernels/custom.cl"))
        );
        assert_eq!(config.device.entry_point, DEFAULT_ENTRY_POINT);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_default_values() {
        let config = BenchConfig::default();
        assert!(config.corpora.is_empty());
        assert_eq!(config.term, "word");
        assert_eq!(config.worker_count.get(), num_cpus::get().max(1));
        assert_eq!(config.shutdown_timeout().unwrap(), Duration::from_secs(60));
        assert_eq!(config.encoding_mode, EncodingMode::FailFast);
        assert_eq!(config.device.class, DeviceClass::Gpu);
        assert!(config.device.kernel_path.is_none());
        assert!(config.output.is_none());
    }

    #[test]
    fn test_merge_with_cli() {
        let config = BenchConfig {
            corpora: vec![CorpusSpec {
                path: PathBuf::from("a.txt"),
                label: None,
            }],
            term: "word".to_string(),
            ..BenchConfig::default()
        };

        let merged = config.clone().merge_with_cli(ConfigOverrides {
            term: Some("cat".to_string()),
            worker_count: NonZeroUsize::new(2),
            device_class: Some(DeviceClass::Accelerator),
            ..ConfigOverrides::default()
        });
        assert_eq!(merged.term, "cat");
        assert_eq!(merged.worker_count.get(), 2);
        assert_eq!(merged.device.class, DeviceClass::Accelerator);
        // No corpora on the command line keeps the configured ones
        assert_eq!(merged.corpora, config.corpora);

        let merged = config.merge_with_cli(ConfigOverrides {
            corpora: vec![CorpusSpec {
                path: PathBuf::from("b.txt"),
                label: None,
            }],
            ..ConfigOverrides::default()
        });
        assert_eq!(merged.corpora.len(), 1);
        assert_eq!(merged.corpora[0].path, PathBuf::from("b.txt"));
    }

    #[test]
    fn test_invalid_shutdown_timeout() {
        let config = BenchConfig {
            shutdown_timeout: "soon".to_string(),
            ..BenchConfig::default()
        };
        assert!(matches!(
            config.shutdown_timeout(),
            Err(CountError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_corpora_order() {
        let dir = tempdir().unwrap();
        for name in ["b.txt", "a.txt", "c.md"] {
            fs::write(dir.path().join(name), "word").unwrap();
        }

        let config = BenchConfig {
            corpora: vec![CorpusSpec {
                path: dir.path().join("c.md"),
                label: Some("markdown".to_string()),
            }],
            corpus_globs: vec![format!("{}/*.txt", dir.path().display())],
            ..BenchConfig::default()
        };

        let corpora = config.resolve_corpora().unwrap();
        let labels: Vec<&str> = corpora.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["markdown", "a.txt", "b.txt"]);
    }

    #[test]
    fn test_invalid_glob() {
        let config = BenchConfig {
            corpus_globs: vec!["[".to_string()],
            ..BenchConfig::default()
        };
        assert!(matches!(
            config.resolve_corpora(),
            Err(CountError::Config(_))
        ));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = BenchConfig::load_from(Some(Path::new("nonexistent.yaml")));
        assert!(result.is_err());
    }
}
