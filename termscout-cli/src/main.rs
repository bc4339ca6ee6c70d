use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::{num::NonZeroUsize, path::PathBuf};
use termscout::{
    config::{ConfigOverrides, CorpusSpec, EncodingMode},
    device::{default_backend, list_devices, ComputeBackend, DeviceClass},
    results::{BenchmarkRecord, RecordStatus, RunSummary},
    BenchConfig, BenchmarkHarness, HarnessError, JsonLinesSink,
};
use tracing::debug;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct RunArgs {
    /// Corpus file to count (can be specified multiple times)
    #[arg(short = 'c', long = "corpus")]
    corpora: Vec<PathBuf>,

    /// Glob pattern selecting corpus files (can be specified multiple times)
    #[arg(short = 'g', long = "glob")]
    globs: Vec<String>,

    /// Whole word to count
    #[arg(short = 't', long)]
    term: Option<String>,

    /// Number of worker threads for the parallel strategy
    #[arg(short = 'j', long)]
    workers: Option<NonZeroUsize>,

    /// How long the parallel strategy may run before it is cancelled (e.g. 30s)
    #[arg(long)]
    shutdown_timeout: Option<String>,

    /// Kernel source file to compile instead of the bundled one
    #[arg(short = 'k', long)]
    kernel: Option<PathBuf>,

    /// Device class to offload to (gpu|cpu|accelerator)
    #[arg(long)]
    device_class: Option<DeviceClass>,

    /// How to handle invalid UTF-8 sequences (failfast|lossy)
    #[arg(long)]
    encoding: Option<String>,

    /// Write records as JSON lines to this file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (error|warn|info|debug|trace)
    #[arg(long)]
    log_level: Option<String>,

    /// Hide the progress bar
    #[arg(short = 'q', long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Count a term with every strategy over every corpus and time each run
    Run(Box<RunArgs>),

    /// List the compute devices the offload backend can see
    Devices,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(*args),
        Commands::Devices => {
            termscout::init_logging("warn");
            print_devices()
        }
    }
}

fn run(args: RunArgs) -> Result<()> {
    let encoding_mode = match args.encoding.as_deref().map(str::to_lowercase).as_deref() {
        None => None,
        Some("failfast") => Some(EncodingMode::FailFast),
        Some("lossy") => Some(EncodingMode::Lossy),
        Some(other) => anyhow::bail!("Unknown encoding mode '{}' (failfast|lossy)", other),
    };

    let overrides = ConfigOverrides {
        corpora: args
            .corpora
            .into_iter()
            .map(|path| CorpusSpec { path, label: None })
            .collect(),
        corpus_globs: args.globs,
        term: args.term,
        worker_count: args.workers,
        shutdown_timeout: args.shutdown_timeout,
        encoding_mode,
        device_class: args.device_class,
        kernel_path: args.kernel,
        log_level: args.log_level,
        output: args.output,
    };
    let config = BenchConfig::load_from(args.config.as_deref())
        .context("Failed to load configuration")?
        .merge_with_cli(overrides);
    termscout::init_logging(&config.log_level);
    debug!("Effective configuration: {:?}", config);

    let mut harness = BenchmarkHarness::new(&config, default_backend())?;
    if harness.corpora().is_empty() {
        anyhow::bail!("No corpora given; use --corpus, --glob or a configuration file");
    }

    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(harness.total_runs() as u64)
    };
    progress.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    let on_record = |record: &BenchmarkRecord| {
        progress.set_message(format!("{} {}", record.strategy, record.corpus));
        progress.inc(1);
    };

    let Some(path) = config.output.clone() else {
        let records = harness.run_with_progress(on_record);
        progress.finish_and_clear();
        print_records(&config.term, &records);
        return Ok(());
    };

    let mut sink = JsonLinesSink::new(&path);
    match harness.run_and_persist_with_progress(&mut sink, on_record) {
        Ok(records) => {
            progress.finish_and_clear();
            print_records(&config.term, &records);
            println!("Records written to {}", path.display().to_string().blue());
            Ok(())
        }
        Err(HarnessError::Sink { source, records }) => {
            progress.finish_and_clear();
            print_records(&config.term, &records);
            Err(anyhow::Error::new(source).context(format!(
                "Failed to write {} records to {}",
                records.len(),
                path.display()
            )))
        }
        Err(e) => Err(e.into()),
    }
}

fn print_records(term: &str, records: &[BenchmarkRecord]) {
    println!(
        "\n{:<14} {:<24} {:>12} {:>8} {:>14}",
        "strategy".bold(),
        "corpus".bold(),
        "occurrences".bold(),
        "failed".bold(),
        "duration".bold()
    );
    for record in records {
        match &record.status {
            RecordStatus::Completed(m) => {
                let failed = if m.failed_units > 0 {
                    m.failed_units.to_string().yellow()
                } else {
                    m.failed_units.to_string().normal()
                };
                println!(
                    "{:<14} {:<24} {:>12} {:>8} {:>14}",
                    record.strategy.to_string().cyan(),
                    record.corpus,
                    m.occurrences.to_string().green(),
                    failed,
                    humantime::format_duration(m.duration).to_string()
                );
            }
            RecordStatus::Failed { kind, error } => {
                println!(
                    "{:<14} {:<24} {} ({:?}): {}",
                    record.strategy.to_string().cyan(),
                    record.corpus,
                    "failed".red(),
                    kind,
                    error
                );
            }
        }
    }

    let summary = RunSummary::from_records(records);
    println!(
        "\nCounted '{}': {} runs completed, {} failed",
        term, summary.completed, summary.failed
    );
    for corpus in summary.disagreements() {
        println!(
            "{} strategies disagree on {}",
            "warning:".yellow().bold(),
            corpus
        );
    }
}

fn print_devices() -> Result<()> {
    let mut backend = default_backend();
    let devices = list_devices(&mut backend)?;
    println!("Backend: {}", backend.name().bold());
    if devices.is_empty() {
        println!("No compute devices found");
        return Ok(());
    }
    for (platform, device) in devices {
        println!(
            "{}  {} ({})",
            platform.name.blue(),
            device.name,
            device.class.to_string().green()
        );
    }
    Ok(())
}
