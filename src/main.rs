//! k-mer Feature Staging CLI
//!
//! Splits a sequence file into per-record inputs and drives the external
//! k-mer counting and feature collection tools.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kmer_stage::{bench, run_pipeline, Config, RunMode, RunRequest};

#[derive(Parser)]
#[command(name = "kmer-stage")]
#[command(about = "Stage sequence records and run k-mer feature extraction", long_about = None)]
struct Cli {
    /// Path to configuration file (defaults are used if it does not exist)
    #[arg(short, long, default_value = "kmer-stage.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split, count and collect features for one sequence file
    Run(RunArgs),

    /// Time a sequential and a parallel run and compare their outputs
    Bench {
        /// Source file under the data directory (overrides the config)
        #[arg(short, long)]
        filename: Option<String>,

        /// Write the report as JSON to this path
        #[arg(long)]
        report: Option<String>,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "kmer-stage.yaml")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Sequence file name, resolved under the data directory
    #[arg(short, long)]
    filename: Option<String>,

    /// Name of the feature file written to the data directory
    #[arg(short, long, default_value = "feature_file.csv")]
    output: String,

    /// Feature directory to run in (copied from the template if it differs)
    #[arg(short = 'd', long)]
    featuredir: Option<String>,

    /// Maximum parallel jobs (default: 80% of available processors)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Pipeline variant
    #[arg(long, value_enum, default_value_t = RunMode::Parallel)]
    mode: RunMode,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            run_command(cli.config, args)?;
        }

        Commands::Bench { filename, report } => {
            bench_command(cli.config, filename, report)?;
        }

        Commands::Validate => {
            validate_command(cli.config)?;
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn run_command(config_path: PathBuf, args: RunArgs) -> Result<()> {
    let mut config = Config::load_or_default(&config_path)?;

    // Apply overrides
    if let Some(jobs) = args.jobs {
        config.processing.jobs = Some(jobs);
    }

    config.validate()?;

    let request = RunRequest {
        filename: args.filename,
        output: args.output,
        featuredir: args
            .featuredir
            .unwrap_or_else(|| config.workspace.template_dir.clone()),
        jobs: config.processing.effective_jobs(),
        mode: args.mode,
    };

    let summary = run_pipeline(&config, &request)?;

    if config.processing.enable_metrics {
        summary.metrics.print_summary();
    }
    if let Some(path) = &config.processing.metrics_output_path {
        if let Err(e) = summary.metrics.save_to_file(path) {
            tracing::warn!("Failed to save metrics: {}", e);
        }
    }

    println!("{summary}");
    Ok(())
}

fn bench_command(config_path: PathBuf, filename: Option<String>, report_path: Option<String>) -> Result<()> {
    let mut config = Config::load_or_default(&config_path)?;
    if let Some(filename) = filename {
        config.benchmark.filename = filename;
    }
    config.validate()?;

    let exe = std::env::current_exe().context("locating the kmer-stage executable")?;
    let cwd = std::env::current_dir().context("reading the current directory")?;
    let harness = bench::plan(&config, &exe, &config_path, &cwd, num_cpus::get())?;

    tracing::info!("k-mer feature generation benchmark");
    tracing::info!("Available CPU cores: {}", harness.processors);
    tracing::info!("Source: {} ({} sequences)", harness.source.display(), harness.records);

    let report = harness.run();
    println!("{report}");

    if let Some(path) = report_path.or(config.benchmark.report_path) {
        report.save_to_file(&path)?;
    }

    println!("\nBenchmark completed!");
    Ok(())
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    // Generate a commented YAML config
    let yaml = r#"# k-mer Feature Staging Configuration

# === WORKSPACE: Directory layout ===
workspace:
  # Base directory; everything below is resolved against it
  root: "."

  # Source sequence files live here; feature files are written here
  data_dir: "data"

  # Pristine feature directory, copied when --featuredir names another one
  template_dir: "features"

  # Layout inside the feature directory:
  #   <analyzer_dir>/<code_dir>     counter working directory
  #   <analyzer_dir>/<input_dir>    split records + manifest
  #   <analyzer_dir>/<output_dir>   counter output, one <k>mer dir per size
  analyzer_dir: "kanalyze-2.0.0"
  code_dir: "code"
  input_dir: "input_data"
  output_dir: "output_data"

  # k-mer lengths counted by the external tool
  kmer_sizes: [2, 3, 4]

  # Character starting each record in the source file
  record_marker: ">"

  # Extension of split record files
  extension: "fasta"

  # Manifest file name (one split file per line)
  manifest_name: "list.txt"

# === COUNTER: External k-mer counting (runs in the code dir) ===
counter:
  parallel:
    program: "./runKanalyzer_parallel"
  sequential:
    program: "./runKanalyzer"

# === COLLECTOR: External feature collection (runs in the feature dir) ===
collector:
  parallel:
    # Run in order before the collector
    build:
      - program: "javac"
        args: ["ParallelKmersFeaturesCollector.java"]
      - program: "javac"
        args: ["BufferReaderAndWriter.java"]
    run:
      program: "java"
      args: ["ParallelKmersFeaturesCollector"]
  sequential:
    build:
      - program: "javac"
        args: ["KmersFeaturesCollector.java"]
      - program: "javac"
        args: ["BufferReaderAndWriter.java"]
    run:
      program: "java"
      args: ["KmersFeaturesCollector"]

  # File the collector writes in its working directory
  artifact_name: "feature_file.csv"

# === PROCESSING: Performance tuning ===
processing:
  # Maximum parallel jobs (null = 80% of available processors)
  # jobs: 16

  # Upper bound on split writer threads
  io_worker_ceiling: 32

  # Print the stage time breakdown after a run
  enable_metrics: true

  # Save metrics as JSON after a run
  # metrics_output_path: "metrics.json"

# === BENCHMARK: Sequential vs. parallel comparison ===
benchmark:
  filename: "demo.fasta"
  sequential_output: "demo_original.csv"
  parallel_output: "demo_parallel.csv"
  sequential_featuredir: "demo_features_original"
  parallel_featuredir: "demo_features_parallel"

  # Cap on the parallel run's job count
  max_jobs: 50

  # Characters of each run's stdout shown in the report
  output_tail_chars: 500

  # Save the report as JSON
  # report_path: "benchmark.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
